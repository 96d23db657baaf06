//! Wall-clock abstraction expressed in absolute epoch milliseconds.
//!
//! Round end times come from the server as epoch milliseconds, so every
//! component that compares against them reads time through [`Clock`] instead of
//! calling the system clock directly.

use std::sync::Arc;

use time::OffsetDateTime;

/// Shared, thread-safe clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64;
}

/// Clock backed by the operating system's UTC time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Convenience constructor returning the clock behind an [`Arc`].
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = testing::ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), 1_250);
    }
}
