//! Hour → blob lookup table loaded from the blob JSON file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, UpdateError};
use crate::model::{BlobPair, BlobRef, HourKey};

/// One hour's entry as written in the file, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "HourEntryRepr")]
pub struct HourEntry {
    /// Avatar reference.
    pub avatar: Option<BlobRef>,
    /// Banner reference.
    pub banner: Option<BlobRef>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PairRepr {
    #[serde(default)]
    avatar: Option<BlobRef>,
    #[serde(default)]
    banner: Option<BlobRef>,
}

// A bare reference is the avatar-only shorthand.
#[derive(Deserialize)]
#[serde(untagged)]
enum HourEntryRepr {
    Pair(PairRepr),
    Avatar(BlobRef),
}

impl From<HourEntryRepr> for HourEntry {
    fn from(r: HourEntryRepr) -> Self {
        match r {
            HourEntryRepr::Pair(p) => Self {
                avatar: p.avatar,
                banner: p.banner,
            },
            HourEntryRepr::Avatar(avatar) => Self {
                avatar: Some(avatar),
                banner: None,
            },
        }
    }
}

/// Immutable mapping of hour → blob references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobTable {
    entries: BTreeMap<HourKey, HourEntry>,
}

impl BlobTable {
    /// Builds a table from already parsed entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (HourKey, HourEntry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Parses the JSON form. Any key that is not a two-digit hour fails the whole table.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let entries: BTreeMap<HourKey, HourEntry> = serde_json::from_str(s)?;
        Ok(Self { entries })
    }

    /// Reads and parses the blob table file.
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!("read blob table {}: {e}", path.display()))
        })?;
        let table = Self::from_json_str(&s).map_err(|e| {
            UpdateError::Config(format!("parse blob table {}: {e}", path.display()))
        })?;
        debug!(
            "loaded {} hour entries from {}",
            table.entries.len(),
            path.display()
        );
        Ok(table)
    }

    /// Number of hours configured.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no hour is configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Selects the references for `hour`.
    ///
    /// A missing hour, a missing or blank avatar, or (with `include_banner`) a
    /// missing or blank banner is a [`UpdateError::Config`]. With
    /// `include_banner == false` the banner is never returned.
    pub fn resolve(&self, hour: HourKey, include_banner: bool) -> Result<BlobPair> {
        let entry = self
            .entries
            .get(&hour)
            .ok_or_else(|| UpdateError::Config(format!("no blob entry for hour {hour}")))?;

        let avatar = match &entry.avatar {
            Some(a) if !a.is_blank() => a.clone(),
            _ => {
                return Err(UpdateError::Config(format!(
                    "blob entry for hour {hour} has no avatar reference"
                )))
            }
        };

        let banner = if include_banner {
            match &entry.banner {
                Some(b) if !b.is_blank() => Some(b.clone()),
                _ => {
                    return Err(UpdateError::Config(format!(
                        "banner updates enabled but hour {hour} has no banner reference"
                    )))
                }
            }
        } else {
            None
        };

        Ok(BlobPair { avatar, banner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour(s: &str) -> HourKey {
        s.parse().unwrap()
    }

    #[test]
    fn bare_string_is_avatar_only() {
        let table = BlobTable::from_json_str(r#"{"07": "bafy7"}"#).unwrap();
        let pair = table.resolve(hour("07"), false).unwrap();
        assert_eq!(pair.avatar, BlobRef::new("bafy7"));
        assert_eq!(pair.banner, None);
    }

    #[test]
    fn banner_dropped_when_disabled() {
        let table =
            BlobTable::from_json_str(r#"{"07": {"avatar": "a", "banner": "b"}}"#).unwrap();
        assert_eq!(table.resolve(hour("07"), false).unwrap().banner, None);
        assert_eq!(
            table.resolve(hour("07"), true).unwrap().banner,
            Some(BlobRef::new("b"))
        );
    }

    #[test]
    fn blank_avatar_rejected() {
        let table = BlobTable::from_json_str(r#"{"07": {"avatar": "  "}}"#).unwrap();
        assert!(matches!(
            table.resolve(hour("07"), false),
            Err(UpdateError::Config(_))
        ));
    }

    #[test]
    fn unknown_entry_fields_rejected() {
        assert!(BlobTable::from_json_str(r#"{"07": {"avatr": "a"}}"#).is_err());
    }
}
