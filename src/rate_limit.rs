//! Minimum-interval spacing for outbound provider calls.
//!
//! Each [`RateLimiter::acquire`] reserves the next free slot (at least
//! `min_interval` after the previous reservation) and sleeps until it. The
//! lock only guards the reservation, so waiters never hold it while
//! sleeping. Spacing is best-effort within one process.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    min_interval: Duration,
    last_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until this caller's slot, then return.
    pub async fn acquire(&self) {
        let slot = {
            let mut last = self.last_slot.lock().await;
            let now = Instant::now();
            let slot = match *last {
                Some(prev) => (prev + self.min_interval).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "rate limiting provider call");
            tokio::time::sleep_until(slot).await;
        }
    }
}
