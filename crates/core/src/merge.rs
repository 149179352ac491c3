//! In-memory merge of selected blobs into a fetched profile record.

use serde_json::{json, Value};
use tracing::debug;

use crate::model::{BlobPair, BlobRef, ProfileRecord, PROFILE_COLLECTION};

/// Record body value for a blob slot.
///
/// Typed blob form when both mime type and size are known, otherwise the
/// legacy `{cid, mimeType}` form.
pub fn blob_value(blob: &BlobRef) -> Value {
    match (&blob.mime_type, blob.size) {
        (Some(mime), Some(size)) => json!({
            "$type": "blob",
            "ref": { "$link": blob.cid },
            "mimeType": mime,
            "size": size,
        }),
        _ => json!({
            "cid": blob.cid,
            "mimeType": blob.mime_type_or_default(),
        }),
    }
}

/// CID referenced by an existing blob slot, in either form.
pub fn slot_cid(slot: &Value) -> Option<&str> {
    slot.get("ref")
        .and_then(|r| r.get("$link"))
        .or_else(|| slot.get("cid"))
        .and_then(Value::as_str)
}

/// Returns a copy of `record` with the avatar (and banner, if selected) slots
/// pointing at `blobs`.
///
/// Every other field is carried over untouched. A slot that already references
/// the same CID is left as is. `$type` is always set.
pub fn merge_blobs(record: &ProfileRecord, blobs: &BlobPair) -> ProfileRecord {
    let mut value = record.value.clone();

    set_slot(&mut value, "avatar", &blobs.avatar);
    if let Some(banner) = &blobs.banner {
        set_slot(&mut value, "banner", banner);
    }

    if record.record_type() != Some(PROFILE_COLLECTION) {
        debug!(
            "fetched record type {:?}; forcing {PROFILE_COLLECTION}",
            record.record_type()
        );
    }
    value.insert("$type".into(), Value::String(PROFILE_COLLECTION.into()));

    ProfileRecord {
        value,
        revision: record.revision.clone(),
    }
}

fn set_slot(value: &mut serde_json::Map<String, Value>, field: &str, blob: &BlobRef) {
    if value.get(field).and_then(slot_cid) == Some(blob.cid.as_str()) {
        debug!("{field} already references {}", blob.cid);
        return;
    }
    value.insert(field.into(), blob_value(blob));
}
