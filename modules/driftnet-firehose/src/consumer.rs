//! The long-lived jetstream connection.

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use driftnet_common::POST_COLLECTION;
use driftnet_store::PostStore;

use crate::error::{FirehoseError, Result};
use crate::events::JetstreamEvent;
use crate::handler::PostHandler;

/// How far behind "now" a fresh connection starts reading, so brief startup
/// or reconnect delay loses no events. The overlap is absorbed by the
/// store's idempotent insert.
const STARTUP_LOOKBACK_SECS: i64 = 60;

/// Consumes post-creation events from one jetstream instance.
pub struct JetstreamConsumer<S> {
    endpoint: String,
    handler: PostHandler<S>,
}

impl<S: PostStore> JetstreamConsumer<S> {
    pub fn new(endpoint: impl Into<String>, handler: PostHandler<S>) -> Self {
        Self {
            endpoint: endpoint.into(),
            handler,
        }
    }

    fn subscribe_url(&self) -> String {
        let cursor =
            (Utc::now() - chrono::Duration::seconds(STARTUP_LOOKBACK_SECS)).timestamp_micros();
        format!(
            "{}?wantedCollections={}&cursor={}",
            self.endpoint, POST_COLLECTION, cursor
        )
    }

    /// Connect and read until the shutdown signal flips or the transport
    /// fails. Events are handed to the pipeline one at a time, strictly in
    /// delivery order.
    pub async fn consume(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let url = self.subscribe_url();
        let (stream, _) = connect_async(&url).await?;
        info!(endpoint = %self.endpoint, "Connected to jetstream");

        let (mut write, mut read) = stream.split();
        loop {
            tokio::select! {
                // Wrapped so the `watch::Ref` guard from `wait_for` is
                // dropped inside the branch future and never crosses the
                // `handle_event` await below (which would make the returned
                // future non-`Send`).
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    info!("stopping consume");
                    return Ok(());
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let event: JetstreamEvent = match serde_json::from_str(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                debug!(error = %e, "Undecodable jetstream frame");
                                continue;
                            }
                        };
                        self.handler.handle_event(&event).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(FirehoseError::Disconnected),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;

    use driftnet_common::Post;
    use driftnet_store::Result as StoreResult;

    use super::*;

    struct NullStore;

    #[async_trait]
    impl PostStore for NullStore {
        async fn insert_post(&self, _post: &Post) -> StoreResult<()> {
            Ok(())
        }
        async fn posts_before(&self, _cursor: i64, _limit: u32) -> StoreResult<Vec<Post>> {
            Ok(Vec::new())
        }
        async fn delete_by_authors(&self, _authors: &HashSet<String>) -> StoreResult<u64> {
            Ok(0)
        }
    }

    #[test]
    fn subscribe_url_carries_collection_and_lookback_cursor() {
        let handler = PostHandler::new(Arc::new(NullStore), None, "driftwood");
        let consumer = JetstreamConsumer::new("wss://jetstream.example/subscribe", handler);

        let url = consumer.subscribe_url();
        assert!(url.starts_with("wss://jetstream.example/subscribe?"));
        assert!(url.contains("wantedCollections=app.bsky.feed.post"));

        let cursor: i64 = url
            .rsplit_once("cursor=")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap();
        let now_us = Utc::now().timestamp_micros();
        let lookback_us = STARTUP_LOOKBACK_SECS * 1_000_000;
        assert!(cursor <= now_us - lookback_us);
        // Within a few seconds of the intended lookback.
        assert!(cursor > now_us - lookback_us - 5_000_000);
    }
}
