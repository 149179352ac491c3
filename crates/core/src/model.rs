use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::UpdateError;

/// Collection NSID of the profile record; doubles as its `$type` discriminator.
pub const PROFILE_COLLECTION: &str = "app.bsky.actor.profile";

/// Record key of the single profile record in a repo.
pub const PROFILE_RKEY: &str = "self";

/// Mime type assumed for a blob reference that does not say otherwise.
pub const DEFAULT_BLOB_MIME: &str = "image/jpeg";

/// Two-digit wall-clock hour, "00" through "23".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HourKey(u8);

impl HourKey {
    /// Builds a key from a numeric hour.
    pub fn from_hour(hour: u32) -> Result<Self, UpdateError> {
        if hour > 23 {
            return Err(UpdateError::config(format!("hour {hour} out of range 0..=23")));
        }
        Ok(Self(hour as u8))
    }

    /// Hour of the given instant in its own timezone.
    pub fn from_local_time<Tz: TimeZone>(t: &DateTime<Tz>) -> Self {
        // chrono guarantees hour() < 24
        Self(t.hour() as u8)
    }

    /// Hour of the local wall clock right now.
    pub fn now_local() -> Self {
        Self::from_local_time(&Local::now())
    }

    /// Numeric hour.
    pub fn hour(self) -> u8 {
        self.0
    }

    /// All 24 keys in order.
    pub fn all() -> impl Iterator<Item = HourKey> {
        (0u8..24).map(HourKey)
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl FromStr for HourKey {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(UpdateError::config(format!(
                "hour key {s:?} is not a two-digit hour"
            )));
        }
        let hour: u32 = s
            .parse()
            .map_err(|_| UpdateError::config(format!("hour key {s:?} is not a number")))?;
        Self::from_hour(hour)
    }
}

impl TryFrom<String> for HourKey {
    type Error = UpdateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HourKey> for String {
    fn from(h: HourKey) -> Self {
        h.to_string()
    }
}

/// Reference to a previously uploaded blob.
///
/// Accepts either a bare CID string or `{ "cid", "mimeType"?, "size"? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BlobRefRepr")]
pub struct BlobRef {
    /// Content identifier of the blob.
    pub cid: String,
    /// Mime type recorded at upload time, if known.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Size in bytes recorded at upload time, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BlobRefRepr {
    Cid(String),
    Full {
        cid: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
        #[serde(default)]
        size: Option<u64>,
    },
}

impl From<BlobRefRepr> for BlobRef {
    fn from(r: BlobRefRepr) -> Self {
        match r {
            BlobRefRepr::Cid(cid) => Self::new(cid),
            BlobRefRepr::Full {
                cid,
                mime_type,
                size,
            } => Self {
                cid,
                mime_type,
                size,
            },
        }
    }
}

impl BlobRef {
    /// Reference with no metadata.
    pub fn new(cid: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            mime_type: None,
            size: None,
        }
    }

    /// Attaches upload metadata.
    pub fn with_meta(mut self, mime_type: impl Into<String>, size: u64) -> Self {
        self.mime_type = Some(mime_type.into());
        self.size = Some(size);
        self
    }

    /// True when the CID is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.cid.trim().is_empty()
    }

    /// Mime type, defaulted.
    pub fn mime_type_or_default(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(DEFAULT_BLOB_MIME)
    }
}

/// The references selected for one hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPair {
    /// Avatar blob, always present.
    pub avatar: BlobRef,
    /// Banner blob; `None` when banner updates are disabled.
    pub banner: Option<BlobRef>,
}

/// The remote profile record plus its revision token.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord {
    /// Full record body as returned by the server.
    pub value: Map<String, Value>,
    /// CID of the record version this body was read at.
    pub revision: Option<String>,
}

impl ProfileRecord {
    /// Wraps a fetched body.
    pub fn new(value: Map<String, Value>, revision: Option<String>) -> Self {
        Self { value, revision }
    }

    /// The `$type` field, if the record carries one.
    pub fn record_type(&self) -> Option<&str> {
        self.value.get("$type").and_then(Value::as_str)
    }
}
