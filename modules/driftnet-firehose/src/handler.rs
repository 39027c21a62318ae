//! The filter/transform pipeline between the firehose and the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use driftnet_common::{Post, POST_COLLECTION};
use driftnet_store::PostStore;

use crate::blocklist::Blocklist;
use crate::events::{CommitOperation, EventKind, FeedPostRecord, JetstreamEvent};

/// Decides which posts enter the feed and shapes them for storage.
///
/// Called once per delivered event, never concurrently: the consumer hands
/// events over strictly in delivery order, which is what makes the store's
/// idempotent insert sufficient without per-key locking.
pub struct PostHandler<S> {
    store: Arc<S>,
    blocklist: Option<Arc<Blocklist>>,
    keyword: String,
}

impl<S: PostStore> PostHandler<S> {
    pub fn new(store: Arc<S>, blocklist: Option<Arc<Blocklist>>, keyword: &str) -> Self {
        Self {
            store,
            blocklist,
            keyword: keyword.to_lowercase(),
        }
    }

    /// Handle one decoded event. Uninteresting or malformed events are
    /// dropped silently; a store failure is logged and swallowed so one bad
    /// write never stops the stream.
    pub async fn handle_event(&self, event: &JetstreamEvent) {
        if event.kind != EventKind::Commit {
            return;
        }
        let Some(commit) = &event.commit else {
            return;
        };
        // Deletes are out of scope; edits are not modeled.
        if commit.operation != CommitOperation::Create {
            return;
        }
        if commit.collection != POST_COLLECTION {
            return;
        }

        let Some(record) = &commit.record else {
            return;
        };
        // Payload shapes evolve upstream; an undecodable record is "not of
        // interest", not an error.
        let Ok(post) = serde_json::from_value::<FeedPostRecord>(record.clone()) else {
            return;
        };

        if !post.text.to_lowercase().contains(&self.keyword) {
            return;
        }

        if let Some(blocklist) = &self.blocklist {
            if blocklist.contains(&event.did) {
                return;
            }
        }

        let created_at = match DateTime::parse_from_rfc3339(&post.created_at) {
            Ok(parsed) => parsed.timestamp_millis(),
            Err(e) => {
                warn!(error = %e, timestamp = %post.created_at, "Unparsable createdAt, using ingestion time");
                Utc::now().timestamp_millis()
            }
        };

        let accepted = Post::new(&event.did, &commit.rkey, created_at);
        if let Err(e) = self.store.insert_post(&accepted).await {
            error!(error = %e, uri = %accepted.uri, "Failed to store post");
        }
    }
}
