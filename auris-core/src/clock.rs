//! Monotonic time abstraction.
//!
//! Every component that makes a timing decision (`SessionController`,
//! `TranscriptionQueue`, `RateLimiter`, `TokenRefreshCoordinator`) takes a
//! `Clock` instead of calling `Instant::now()` directly, so unit tests can
//! drive time deterministically instead of sleeping real wall-clock seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of monotonic instants.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The real wall clock. Used everywhere outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that starts at the instant it is created and advances only when
/// told to. Lets tests assert `SessionController`/`RateLimiter` behavior at
/// exact offsets without sleeping.
pub struct MockClock {
    origin: Instant,
    offset_millis: AtomicU64,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_millis: AtomicU64::new(0),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.offset_millis
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
    }
}
