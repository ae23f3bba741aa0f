//! `RateLimiter` — a minimum-interval pacer, not a fixed-window counter.
//!
//! Each call to [`RateLimiter::wait_and_record`] atomically reserves the
//! next free slot (`max(last_slot + interval, now)`), then sleeps until
//! that instant. Concurrent callers therefore receive strictly distinct
//! slots spaced by `minimum_interval` apart instead of racing for a shared
//! counter, using the same CAS-loop-over-`AtomicU64` idiom as other
//! counter reservations in this codebase, generalized here to reserve
//! points in time instead of integers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{EngineError, Result};

/// Minimum-interval pacer: at most one reservation may be granted per
/// `minimum_interval` of wall-clock time, but unlike a fixed window every
/// caller still gets a slot — they just wait longer as more callers queue
/// up.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    minimum_interval: Duration,
    epoch: std::time::Instant,
    /// Millisecond offset from `epoch` of the most recently reserved slot.
    /// `u64::MAX` means "no slot reserved yet".
    last_slot_millis: AtomicU64,
}

const NO_SLOT: u64 = u64::MAX;

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, minimum_interval: Duration) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            minimum_interval,
            epoch,
            last_slot_millis: AtomicU64::new(NO_SLOT),
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now().duration_since(self.epoch).as_millis() as u64
    }

    /// Reserve the next available slot, returning how long the caller must
    /// wait before it. Never sleeps itself — see `wait_and_record`.
    fn reserve_slot_millis(&self) -> u64 {
        let interval_millis = self.minimum_interval.as_millis() as u64;
        loop {
            let now = self.now_millis();
            let last = self.last_slot_millis.load(Ordering::Acquire);
            let candidate = if last == NO_SLOT {
                now
            } else {
                (last + interval_millis).max(now)
            };

            if self
                .last_slot_millis
                .compare_exchange(last, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return candidate;
            }
            // Lost the CAS race to a concurrent reserver; retry and read
            // the fresh `last_slot_millis`.
        }
    }

    /// Reserve the next slot and sleep until it arrives. The first call
    /// after construction always waits 0. Like any `tokio::time::sleep`
    /// await, dropping this future (the caller's task is aborted or
    /// selected against) stops the wait immediately without side effects —
    /// the slot it reserved simply goes unused, it is never "given back"
    /// to a later caller.
    pub async fn wait_and_record(&self) -> Result<()> {
        let slot_millis = self.reserve_slot_millis();
        let now_millis = self.now_millis();
        let wait = slot_millis.saturating_sub(now_millis);
        if wait > 0 {
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }
        Ok(())
    }

    /// A non-reserving query: how long a caller would have to wait *right
    /// now* if it called `wait_and_record`.
    pub fn time_until_next_allowed(&self) -> Duration {
        let interval_millis = self.minimum_interval.as_millis() as u64;
        let last = self.last_slot_millis.load(Ordering::Acquire);
        if last == NO_SLOT {
            return Duration::ZERO;
        }
        let now = self.now_millis();
        let next = last + interval_millis;
        Duration::from_millis(next.saturating_sub(now))
    }
}
