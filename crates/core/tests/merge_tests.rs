use avatar_core::api::PutRecordRequest;
use avatar_core::merge::blob_value;
use avatar_core::{merge_blobs, BlobPair, BlobRef, ProfileRecord, PROFILE_COLLECTION};
use serde_json::{json, Map, Value};

fn record(v: Value, rev: Option<&str>) -> ProfileRecord {
    let Value::Object(map) = v else {
        panic!("record must be an object")
    };
    ProfileRecord::new(map, rev.map(String::from))
}

fn avatar_only(cid: &str) -> BlobPair {
    BlobPair {
        avatar: BlobRef::new(cid),
        banner: None,
    }
}

#[test]
fn merge_preserves_unrelated_fields() {
    let fetched = record(
        json!({
            "$type": PROFILE_COLLECTION,
            "displayName": "X",
            "description": "hello",
            "labels": {"values": []},
            "banner": {"cid": "old-banner", "mimeType": "image/jpeg"},
            "avatar": {"cid": "old", "mimeType": "image/jpeg"},
        }),
        Some("rev1"),
    );

    let merged = merge_blobs(&fetched, &avatar_only("cidA"));

    assert_eq!(merged.value["avatar"], blob_value(&BlobRef::new("cidA")));
    assert_eq!(merged.value["displayName"], "X");
    assert_eq!(merged.value["description"], "hello");
    assert_eq!(merged.value["labels"], json!({"values": []}));
    assert_eq!(merged.value["banner"], fetched.value["banner"]);
    assert_eq!(merged.revision.as_deref(), Some("rev1"));
}

#[test]
fn noop_merge_only_adds_discriminator() {
    let original = json!({
        "displayName": "X",
        "avatar": {"$type": "blob", "ref": {"$link": "same"}, "mimeType": "image/png", "size": 9},
    });
    let fetched = record(original.clone(), Some("rev"));

    let merged = merge_blobs(&fetched, &avatar_only("same"));

    let mut expected: Map<String, Value> = original.as_object().unwrap().clone();
    expected.insert("$type".into(), json!(PROFILE_COLLECTION));
    assert_eq!(merged.value, expected);
}

#[test]
fn merge_sets_banner_when_selected() {
    let fetched = record(json!({"displayName": "X"}), None);
    let pair = BlobPair {
        avatar: BlobRef::new("a"),
        banner: Some(BlobRef::new("b").with_meta("image/png", 77)),
    };
    let merged = merge_blobs(&fetched, &pair);
    assert_eq!(merged.value["banner"]["ref"]["$link"], "b");
    assert_eq!(merged.value["avatar"]["cid"], "a");
}

#[test]
fn put_request_always_carries_discriminator() {
    // Record fetched without any $type and never merged.
    let bare = record(json!({"displayName": "X"}), Some("rev"));
    let req = PutRecordRequest::profile("did:plc:abc", &bare);
    assert_eq!(req.record()["$type"], PROFILE_COLLECTION);
    assert_eq!(req.swap_record(), Some("rev"));

    let wire = serde_json::to_value(&req).unwrap();
    assert_eq!(wire["collection"], PROFILE_COLLECTION);
    assert_eq!(wire["rkey"], "self");
    assert_eq!(wire["repo"], "did:plc:abc");
    assert_eq!(wire["swapRecord"], "rev");
    assert_eq!(wire["record"]["$type"], PROFILE_COLLECTION);
}

#[test]
fn put_request_omits_swap_without_revision() {
    let req = PutRecordRequest::profile("did:plc:abc", &record(json!({}), None));
    let wire = serde_json::to_value(&req).unwrap();
    assert!(wire.get("swapRecord").is_none());
}
