//! General time utility functions

use chrono;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Number of nanoseconds in a millisecond
pub const NANOS_PER_MILLISECOND: i64 = 1_000_000;

/// Number of milliseconds in a second
pub const MILLIS_PER_SECOND: f64 = 1000.0;

/// Convert a chrono duration into a number of seconds, or `None` if overflow
pub fn chrono_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert a duration into fractional milliseconds.
pub fn duration_to_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * MILLIS_PER_SECOND
}

/// Current wall clock time as floating point seconds since the unix epoch.
///
/// This is the timebase used for all timestamps that leave the robot. A clock set before 1970
/// reads as zero.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(duration_to_ms(Duration::from_millis(1500)), 1500.0);
        assert_eq!(duration_to_ms(Duration::from_micros(250)), 0.25);
        assert_eq!(chrono_to_seconds(chrono::Duration::milliseconds(2500)), Some(2.5));
        assert!(epoch_seconds() > 1.0e9);
    }
}
