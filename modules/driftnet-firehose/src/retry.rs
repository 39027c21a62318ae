//! Reconnect supervision for the consume loop.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, warn};

use crate::error::Result;

/// Reconnect policy for a supervised operation.
///
/// The feed's usefulness depends on never permanently giving up on the
/// upstream connection while the process is alive, so the default is
/// unbounded attempts with no delay between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            delay: Duration::ZERO,
        }
    }
}

/// Drive `op` until it returns `Ok` (a clean, shutdown-initiated exit), the
/// policy's attempt limit is exhausted, or the shutdown signal flips.
pub async fn supervise<F, Fut>(policy: RetryPolicy, mut shutdown: watch::Receiver<bool>, mut op: F)
where
    F: FnMut(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempts = 0u32;
    loop {
        if *shutdown.borrow() {
            break;
        }

        match op(shutdown.clone()).await {
            Ok(()) => break,
            Err(e) => {
                attempts += 1;
                error!(error = %e, attempt = attempts, "Consume loop failed, reconnecting");

                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    break;
                }
                if !policy.delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(policy.delay) => {}
                        _ = shutdown.wait_for(|stop| *stop) => break,
                    }
                }
            }
        }
    }
    warn!("Exiting consume loop");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::FirehoseError;

    #[tokio::test]
    async fn retries_until_the_operation_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = watch::channel(false);

        let counter = Arc::clone(&calls);
        supervise(RetryPolicy::default(), rx, move |_shutdown| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FirehoseError::Disconnected)
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bounded_policy_stops_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = watch::channel(false);

        let policy = RetryPolicy {
            max_attempts: Some(2),
            delay: Duration::ZERO,
        };
        let counter = Arc::clone(&calls);
        supervise(policy, rx, move |_shutdown| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FirehoseError::Disconnected)
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_prevents_another_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = Arc::clone(&calls);
        supervise(RetryPolicy::default(), rx, move |_shutdown| {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Shutdown arrives while the connection is down.
                let _ = tx.send(true);
                Err(FirehoseError::Disconnected)
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
