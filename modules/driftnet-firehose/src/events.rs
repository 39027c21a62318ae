//! Jetstream wire schema.
//!
//! One JSON frame per event. Only the fields the pipeline reads are modeled;
//! everything else upstream sends is ignored.

use serde::Deserialize;

/// One unit delivered by jetstream.
#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamEvent {
    /// Author of the repo the event came from.
    pub did: String,
    /// Server-side delivery position, microsecond epoch.
    pub time_us: i64,
    pub kind: EventKind,
    #[serde(default)]
    pub commit: Option<Commit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Commit,
    Identity,
    Account,
    #[serde(other)]
    Unknown,
}

/// A repo commit carried by a [`EventKind::Commit`] event.
#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub operation: CommitOperation,
    pub collection: String,
    pub rkey: String,
    /// The record payload, left opaque until the collection check passes.
    #[serde(default)]
    pub record: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOperation {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

/// The subset of an `app.bsky.feed.post` record the filter needs.
///
/// Missing fields decode to empty strings, mirroring how heterogeneous the
/// firehose payloads are in practice.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE_FRAME: &str = r#"{
        "did": "did:plc:alice",
        "time_us": 1725911162329308,
        "kind": "commit",
        "commit": {
            "rev": "3l3qo2vutsw2b",
            "operation": "create",
            "collection": "app.bsky.feed.post",
            "rkey": "3l3qo2vuowo2b",
            "record": {
                "$type": "app.bsky.feed.post",
                "createdAt": "2024-09-09T19:46:02.102Z",
                "text": "hello world",
                "langs": ["en"]
            },
            "cid": "bafyreidwaivazkwu67xztlmuobx35hs2lnfh3kolmgfmucldvhd3sgzcqi"
        }
    }"#;

    #[test]
    fn decodes_a_create_commit() {
        let event: JetstreamEvent = serde_json::from_str(CREATE_FRAME).unwrap();
        assert_eq!(event.did, "did:plc:alice");
        assert_eq!(event.kind, EventKind::Commit);

        let commit = event.commit.expect("commit present");
        assert_eq!(commit.operation, CommitOperation::Create);
        assert_eq!(commit.collection, "app.bsky.feed.post");
        assert_eq!(commit.rkey, "3l3qo2vuowo2b");

        let record: FeedPostRecord =
            serde_json::from_value(commit.record.expect("record present")).unwrap();
        assert_eq!(record.text, "hello world");
        assert_eq!(record.created_at, "2024-09-09T19:46:02.102Z");
    }

    #[test]
    fn decodes_non_commit_kinds() {
        let frame = r#"{"did":"did:plc:bob","time_us":1,"kind":"identity"}"#;
        let event: JetstreamEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(event.kind, EventKind::Identity);
        assert!(event.commit.is_none());
    }

    #[test]
    fn unknown_kinds_and_operations_do_not_fail_decoding() {
        let frame = r#"{"did":"did:plc:bob","time_us":1,"kind":"somethingnew"}"#;
        let event: JetstreamEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(event.kind, EventKind::Unknown);

        let commit: Commit = serde_json::from_str(
            r#"{"operation":"merge","collection":"app.bsky.feed.post","rkey":"3k"}"#,
        )
        .unwrap();
        assert_eq!(commit.operation, CommitOperation::Unknown);
    }

    #[test]
    fn post_record_tolerates_missing_fields() {
        let record: FeedPostRecord = serde_json::from_str("{}").unwrap();
        assert!(record.text.is_empty());
        assert!(record.created_at.is_empty());
    }
}
