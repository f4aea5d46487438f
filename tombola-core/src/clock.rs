//! Clock abstraction for the batch jobs.
//!
//! The jobs re-derive "now" on every tick instead of trusting the trigger
//! payload, so the clock is an injected dependency rather than an ambient
//! call to `OffsetDateTime::now_utc()`. Tests pin it to a fixed instant.

use std::sync::Arc;
use time::OffsetDateTime;

/// Source of the current time for scan predicates.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock frozen at a fixed instant.
///
/// Used by tests and by operators replaying a past window.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Convenience constructor for the default shared clock.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
