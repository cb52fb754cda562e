//! Reconnection modes and retry policy (§4.3 "Reconnection").
//!
//! `Resume` keeps the existing peer connections and re-syncs state once
//! the signalling WebSocket reopens; `Reconnect` tears both peer
//! connections down and rebuilds them from a fresh `ReconnectResponse`.
//! Both modes share the same retry/backoff shape, just with a different
//! body executed between attempts.

use std::time::Duration;

/// Which reconnection strategy to apply, per the trigger table in §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Transient drop: keep peer connections, send `SyncState`, re-trickle
    /// buffered candidates.
    Resume,
    /// Full ICE failure or a resume that itself failed: tear down and
    /// recreate both peer connections, re-publish live tracks.
    Reconnect,
}

/// Bounded retry policy: up to `max_attempts` tries separated by
/// `attempt_delay`, after which the caller should disconnect with
/// `LiveKitError::Transport`.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub attempt_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, attempt_delay: Duration) -> Self {
        Self { max_attempts, attempt_delay }
    }

    /// Runs `attempt` up to `max_attempts` times, sleeping `attempt_delay`
    /// between failures, short-circuiting on the first success. Returns
    /// `Ok(())` if some attempt succeeded, `Err(())` once attempts are
    /// exhausted.
    pub async fn retry<F, Fut>(&self, mut attempt: F) -> Result<(), ()>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for n in 0..self.max_attempts {
            if attempt(n).await {
                return Ok(());
            }
            if n + 1 < self.max_attempts {
                tokio::time::sleep(self.attempt_delay).await;
            }
        }
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_first_success() {
        let policy = ReconnectPolicy::new(3, Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result = policy
            .retry(|n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { n == 1 }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhausts_after_max_attempts() {
        let policy = ReconnectPolicy::new(3, Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result = policy
            .retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { false }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
