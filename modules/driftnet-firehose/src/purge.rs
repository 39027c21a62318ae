//! Retroactive removal of posts by blocked authors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use driftnet_store::PostStore;

use crate::blocklist::Blocklist;

/// How often retained posts are re-checked against the blocklist.
const PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Bound on one purge cycle's store work.
const PURGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Spawn the purge loop. Insert-time filtering only stops future posts; an
/// author added to the list later must have their already-stored posts
/// removed too. Exits when `shutdown` flips.
pub fn spawn_purge_loop<S>(
    store: Arc<S>,
    blocklist: Arc<Blocklist>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: PostStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                // Wrapped so the `watch::Ref` guard from `wait_for` is
                // dropped inside the branch future and never crosses the
                // `delete_by_authors` await below (which would make the
                // spawned task non-`Send`).
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => return,
                _ = ticker.tick() => {
                    let blocked = blocklist.snapshot();
                    match tokio::time::timeout(PURGE_TIMEOUT, store.delete_by_authors(&blocked)).await {
                        Ok(Ok(0)) => {}
                        Ok(Ok(removed)) => info!(removed, "Purged posts from blocked authors"),
                        Ok(Err(e)) => error!(error = %e, "Failed to purge blocked posts"),
                        Err(_) => error!("Purge cycle timed out"),
                    }
                }
            }
        }
    });
}
