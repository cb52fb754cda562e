//! Debounced offer negotiation (§4.3, "Negotiation protocol (publisher
//! side)").
//!
//! Successive `negotiate()` calls reset a timer instead of each firing
//! its own offer; `force=true` bypasses the debounce. This is owned
//! separately from `TransportManager` so the debounce timing logic has a
//! unit-testable surface independent of real peer connections.

use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

/// Coalesces calls to `request()` into a single fire after `delay` of
/// quiescence (capped at `max_delay` since the first request in a burst),
/// or immediately on a `force` request.
pub struct NegotiationDebouncer {
    request_tx: mpsc::UnboundedSender<bool>,
    fire_notify: std::sync::Arc<Notify>,
}

impl NegotiationDebouncer {
    /// Spawns the debounce task. Returns the debouncer handle and a
    /// `Notify` the caller awaits on to know when to actually fire an
    /// offer.
    pub fn spawn(delay: Duration, max_delay: Duration) -> Self {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<bool>();
        let fire_notify = std::sync::Arc::new(Notify::new());
        let notify_for_task = fire_notify.clone();

        tokio::spawn(async move {
            loop {
                let Some(force) = request_rx.recv().await else {
                    return;
                };
                if force {
                    notify_for_task.notify_one();
                    continue;
                }

                let burst_start = Instant::now();
                let mut deadline = Instant::now() + delay;
                loop {
                    let cap = burst_start + max_delay;
                    let effective_deadline = deadline.min(cap);
                    tokio::select! {
                        _ = tokio::time::sleep_until(effective_deadline) => {
                            notify_for_task.notify_one();
                            break;
                        }
                        next = request_rx.recv() => {
                            match next {
                                Some(true) => {
                                    notify_for_task.notify_one();
                                    break;
                                }
                                Some(false) => {
                                    deadline = Instant::now() + delay;
                                }
                                None => return,
                            }
                        }
                    }
                }
            }
        });

        Self { request_tx, fire_notify }
    }

    pub fn request(&self, force: bool) {
        let _ = self.request_tx.send(force);
    }

    pub fn fire_notify(&self) -> std::sync::Arc<Notify> {
        self.fire_notify.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn force_fires_immediately() {
        let debouncer = NegotiationDebouncer::spawn(Duration::from_millis(50), Duration::from_millis(100));
        let notify = debouncer.fire_notify();
        debouncer.request(true);

        tokio::time::timeout(Duration::from_millis(5), notify.notified())
            .await
            .expect("force request should fire without waiting for the debounce delay");
    }

    #[tokio::test(start_paused = true)]
    async fn successive_requests_reset_the_timer() {
        let debouncer = NegotiationDebouncer::spawn(Duration::from_millis(50), Duration::from_millis(1000));
        let notify = debouncer.fire_notify();

        debouncer.request(false);
        tokio::time::advance(Duration::from_millis(30)).await;
        debouncer.request(false); // resets the 50ms window
        tokio::time::advance(Duration::from_millis(30)).await;

        // Still within the reset window; should not have fired yet.
        assert!(tokio::time::timeout(Duration::from_millis(1), notify.notified())
            .await
            .is_err());

        tokio::time::advance(Duration::from_millis(25)).await;
        notify.notified().await;
    }
}
