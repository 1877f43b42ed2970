//! Pipeline time base
//!
//! All pipeline timestamps are whole microseconds since the Unix epoch.
//! DevTools reports capture times as fractional seconds; that gets converted
//! here, once, at the boundary. Log output converts back to fractional
//! milliseconds for readability.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in microseconds since the Unix epoch
pub fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Convert a fractional-seconds timestamp (DevTools metadata) to microseconds
pub fn seconds_to_micros(seconds: f64) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * 1_000_000.0) as u64
}

/// Convert microseconds to fractional milliseconds for log output
pub fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1_000.0
}

/// Saturating delta between two microsecond timestamps, in milliseconds
pub fn delta_ms(later_us: u64, earlier_us: u64) -> f64 {
    micros_to_ms(later_us.saturating_sub(earlier_us))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_to_micros() {
        assert_eq!(seconds_to_micros(1.5), 1_500_000);
        assert_eq!(seconds_to_micros(0.0), 0);
        assert_eq!(seconds_to_micros(-3.0), 0);
    }

    #[test]
    fn test_micros_to_ms() {
        assert_eq!(micros_to_ms(1_500), 1.5);
        assert_eq!(micros_to_ms(0), 0.0);
    }

    #[test]
    fn test_delta_saturates() {
        assert_eq!(delta_ms(1_000, 2_000), 0.0);
        assert_eq!(delta_ms(2_000, 1_000), 1.0);
    }

    #[test]
    fn test_unix_micros_monotonic_enough() {
        let a = unix_micros();
        let b = unix_micros();
        assert!(b >= a);
    }
}
