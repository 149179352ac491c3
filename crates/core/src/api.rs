//! Wire types for the XRPC calls the updater makes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{ProfileRecord, PROFILE_COLLECTION, PROFILE_RKEY};

/// `com.atproto.server.createSession` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Handle or DID.
    pub identifier: String,
    /// App password.
    pub password: String,
}

/// `com.atproto.server.createSession` output (fields we use).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub access_jwt: String,
    #[serde(default)]
    pub refresh_jwt: Option<String>,
    pub handle: String,
    pub did: String,
}

/// `com.atproto.repo.getRecord` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRecordResponse {
    pub uri: String,
    /// Record CID; the revision token passed back as `swapRecord`.
    #[serde(default)]
    pub cid: Option<String>,
    pub value: Map<String, Value>,
}

/// `com.atproto.repo.putRecord` input for the profile record.
///
/// Only constructible through [`PutRecordRequest::profile`], which always
/// sets the collection and the record's `$type`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRecordRequest {
    repo: String,
    collection: &'static str,
    rkey: &'static str,
    record: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    swap_record: Option<String>,
}

impl PutRecordRequest {
    /// Full-record replacement of `did`'s profile, guarded by the record's revision.
    pub fn profile(did: impl Into<String>, record: &ProfileRecord) -> Self {
        let mut body = record.value.clone();
        body.insert("$type".into(), Value::String(PROFILE_COLLECTION.into()));
        Self {
            repo: did.into(),
            collection: PROFILE_COLLECTION,
            rkey: PROFILE_RKEY,
            record: body,
            swap_record: record.revision.clone(),
        }
    }

    /// Target repo DID.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Record body that will be written.
    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }

    /// Revision the write is conditional on.
    pub fn swap_record(&self) -> Option<&str> {
        self.swap_record.as_deref()
    }
}

/// `com.atproto.repo.putRecord` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRecordResponse {
    pub uri: String,
    pub cid: String,
}

/// Error body every XRPC endpoint returns on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XrpcErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `/xrpc/_health` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub version: Option<String>,
}
