//! Connectivity breaker — counts transport failures and fires a callback
//! once a threshold is reached.
//!
//! The count is cumulative: a success does not clear it, only `reset()`
//! does. The callback runs at most once until the breaker is reset. What it
//! does (log, exit, reconnect) is up to whoever builds the breaker; the
//! library never terminates the process itself.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

type TripFn = Box<dyn Fn(u32) + Send + Sync>;

pub struct ConnectivityBreaker {
    threshold: u32,
    failures: AtomicU32,
    tripped: AtomicBool,
    on_trip: TripFn,
}

impl ConnectivityBreaker {
    /// `threshold` of 0 disables tripping; failures are still counted.
    pub fn new(threshold: u32, on_trip: impl Fn(u32) + Send + Sync + 'static) -> Self {
        Self {
            threshold,
            failures: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
            on_trip: Box::new(on_trip),
        }
    }

    /// Record one failure. Returns the cumulative count.
    pub fn record_failure(&self) -> u32 {
        let count = self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        tracing::warn!(
            failures = count,
            threshold = self.threshold,
            "transport failure recorded"
        );

        if self.threshold > 0
            && count >= self.threshold
            && !self.tripped.swap(true, Ordering::SeqCst)
        {
            tracing::error!(failures = count, "connectivity breaker tripped");
            (self.on_trip)(count);
        }
        count
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Clear the count and re-arm the callback.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.tripped.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for ConnectivityBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityBreaker")
            .field("threshold", &self.threshold)
            .field("failures", &self.failures())
            .field("tripped", &self.is_tripped())
            .finish()
    }
}
