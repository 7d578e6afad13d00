//! Wall-clock adapter.

use crate::domain::Timestamp;
use crate::ports::Clock;

/// Production clock backed by `std::time::SystemTime`.
///
/// For tests, use `ManualClock` from the test utilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        Timestamp::from_millis(duration.as_millis() as u64)
    }
}
