//! Log throttling
//!
//! Soft-failure paths (encoder overload drops, decoder errors) can fire many
//! times per second; a gate keeps the log readable by letting each key
//! through at most once per interval.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-key rate gate for repeated log messages
pub struct LogGate {
    last: Mutex<HashMap<&'static str, Instant>>,
    interval: Duration,
}

impl LogGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Returns `true` if the message for `key` should be logged now; updates
    /// the key's timestamp when it does.
    pub fn should_log(&self, key: &'static str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match last.get(key) {
            Some(at) if now.duration_since(*at) < self.interval => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }
}

impl Default for LogGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_passes_then_gated() {
        let gate = LogGate::new(Duration::from_millis(50));
        assert!(gate.should_log("drop"));
        assert!(!gate.should_log("drop"));
        std::thread::sleep(Duration::from_millis(70));
        assert!(gate.should_log("drop"));
    }

    #[test]
    fn test_keys_independent() {
        let gate = LogGate::default();
        assert!(gate.should_log("a"));
        assert!(gate.should_log("b"));
        assert!(!gate.should_log("a"));
    }
}
