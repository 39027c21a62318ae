//! Moderation blocklist backed by an `app.bsky.graph.list`.
//!
//! The member set is refreshed on a timer and swapped in wholesale, so the
//! filter pipeline reads one complete snapshot per check and never a set
//! that is mid-rebuild.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

use crate::error::{FirehoseError, Result};
use crate::xrpc::{Session, XrpcClient};

/// How often the member list is re-fetched.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Bound on one refresh cycle's network work, so a hung upstream call
/// cannot wedge shutdown.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for list pagination.
const PAGE_LIMIT: u32 = 100;

pub struct Blocklist {
    client: XrpcClient,
    session: Mutex<Session>,
    handle: String,
    app_password: String,
    list_uri: String,
    blocked: ArcSwap<HashSet<String>>,
}

impl Blocklist {
    /// Authenticate and perform the initial full fetch. Construction fails
    /// if either step fails.
    pub async fn connect(
        host: &str,
        handle: &str,
        app_password: &str,
        list_key: &str,
    ) -> Result<Arc<Self>> {
        let client = XrpcClient::new(host);
        let session = client.create_session(handle, app_password).await?;
        let list_uri = format!("at://{}/app.bsky.graph.list/{}", session.did, list_key);

        let blocklist = Arc::new(Self {
            client,
            session: Mutex::new(session),
            handle: handle.to_string(),
            app_password: app_password.to_string(),
            list_uri,
            blocked: ArcSwap::new(Arc::new(HashSet::new())),
        });

        info!(list = %blocklist.list_uri, "Initial blocklist fetch");
        blocklist.refresh().await?;

        Ok(blocklist)
    }

    /// Membership check against the current snapshot. Lock-free: the load
    /// is a pointer read, never an iteration under a lock.
    pub fn contains(&self, did: &str) -> bool {
        self.blocked.load().contains(did)
    }

    /// The current snapshot. Callers keep a consistent view even if a
    /// refresh swaps in a new set while they hold it.
    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        self.blocked.load_full()
    }

    /// Fetch the full member list into a fresh set and swap it in. On a
    /// mid-pagination failure the previous snapshot stays in force:
    /// stale-but-consistent beats empty-but-wrong.
    pub async fn refresh(&self) -> Result<()> {
        let session = self.session.lock().await.clone();

        let mut fresh: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .client
                .get_list(&session, &self.list_uri, cursor.as_deref(), PAGE_LIMIT)
                .await?;
            fresh.extend(page.items.into_iter().map(|item| item.subject.did));

            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        let count = fresh.len();
        self.blocked.store(Arc::new(fresh));
        debug!(blocked = count, "Blocklist updated");
        Ok(())
    }

    async fn refresh_session(&self) -> Result<()> {
        info!("Refreshing blocklist session");
        let renewed = self
            .client
            .create_session(&self.handle, &self.app_password)
            .await?;
        *self.session.lock().await = renewed;
        Ok(())
    }

    async fn bounded_refresh(&self) -> Result<()> {
        tokio::time::timeout(FETCH_TIMEOUT, self.refresh())
            .await
            .map_err(|_| FirehoseError::RefreshTimeout)?
    }

    /// One timer tick: refresh, re-authenticating once if the session has
    /// expired. Failures are logged and the cache waits for the next tick.
    async fn refresh_cycle(&self) {
        match self.bounded_refresh().await {
            Ok(()) => {}
            Err(FirehoseError::ExpiredToken) => {
                if let Err(e) = self.refresh_session().await {
                    error!(error = %e, "Failed to refresh session");
                    return;
                }
                if let Err(e) = self.bounded_refresh().await {
                    error!(error = %e, "Error refreshing blocklist after session refresh");
                }
            }
            Err(e) => error!(error = %e, "Error refreshing blocklist"),
        }
    }

    /// Spawn the background refresh loop. Exits when `shutdown` flips.
    pub fn spawn_refresh_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let blocklist = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial fetch
            // already ran during construction.
            ticker.tick().await;
            loop {
                tokio::select! {
                    // Wrapped so the `watch::Ref` guard from `wait_for` is
                    // dropped inside the branch future and never crosses the
                    // `refresh_cycle` await below (which would make the
                    // spawned task non-`Send`).
                    _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => return,
                    _ = ticker.tick() => blocklist.refresh_cycle().await,
                }
            }
        });
    }

    /// A blocklist seeded directly from a set, for tests.
    #[cfg(test)]
    pub(crate) fn from_set(entries: HashSet<String>) -> Arc<Self> {
        Arc::new(Self {
            client: XrpcClient::new("http://localhost"),
            session: Mutex::new(Session {
                access_jwt: String::new(),
                refresh_jwt: String::new(),
                handle: String::new(),
                did: String::new(),
            }),
            handle: String::new(),
            app_password: String::new(),
            list_uri: String::new(),
            blocked: ArcSwap::new(Arc::new(entries)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_reflects_the_seeded_set() {
        let blocklist = Blocklist::from_set(HashSet::from(["did:plc:spammer".to_string()]));
        assert!(blocklist.contains("did:plc:spammer"));
        assert!(!blocklist.contains("did:plc:alice"));
    }

    #[test]
    fn readers_never_observe_a_partial_swap() {
        let blocklist = Blocklist::from_set(HashSet::from(
            ["did:plc:old1".to_string(), "did:plc:old2".to_string()],
        ));

        // A reader that grabbed the snapshot before the swap keeps the full
        // old set; readers after the swap see only the full new set.
        let before = blocklist.snapshot();
        blocklist
            .blocked
            .store(Arc::new(HashSet::from(["did:plc:new".to_string()])));

        assert!(before.contains("did:plc:old1"));
        assert!(before.contains("did:plc:old2"));
        assert!(!before.contains("did:plc:new"));

        assert!(blocklist.contains("did:plc:new"));
        assert!(!blocklist.contains("did:plc:old1"));
    }
}
