//! Clock capability.
//!
//! Every time-dependent component obtains "now" through this trait instead of
//! calling `chrono::Utc::now()` directly, so tests can drive baseline windows,
//! rate limits, and alert timestamps deterministically. Grounded on the
//! teacher's pattern of injecting small capability traits (`HealthCheck` in
//! `background/self_healer.rs`) rather than hard-coding a concrete type.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A source of monotonic-enough wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only advances when told to.
///
/// Stores the current instant as nanoseconds-since-epoch in an `AtomicI64` so
/// it can be shared (`Arc<FakeClock>`) and advanced from another thread
/// without a mutex.
#[derive(Debug)]
pub struct FakeClock {
    nanos: AtomicI64,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            nanos: AtomicI64::new(start.timestamp_nanos_opt().unwrap_or(0)),
        })
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.nanos.fetch_add(
            delta.num_nanoseconds().unwrap_or(0),
            Ordering::SeqCst,
        );
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.nanos
            .store(at.timestamp_nanos_opt().unwrap_or(0), Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let nanos = self.nanos.load(Ordering::SeqCst);
        DateTime::from_timestamp(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
            .unwrap_or_else(Utc::now)
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
