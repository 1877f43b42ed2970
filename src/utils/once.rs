//! Run-once guard for idempotent teardown
//!
//! Close paths must execute exactly once regardless of how many callers race
//! into them. The first caller wins; everyone else gets a no-op.

use std::sync::atomic::{AtomicBool, Ordering};

/// Idempotent-invocation guard
#[derive(Debug, Default)]
pub struct OnceGuard {
    done: AtomicBool,
}

impl OnceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for exactly one caller; all later or concurrent
    /// callers get `false`.
    pub fn enter(&self) -> bool {
        !self.done.swap(true, Ordering::SeqCst)
    }

    /// Whether the guarded section has already been entered
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_caller_wins() {
        let guard = OnceGuard::new();
        assert!(!guard.is_done());
        assert!(guard.enter());
        assert!(guard.is_done());
        assert!(!guard.enter());
        assert!(!guard.enter());
    }

    #[test]
    fn test_concurrent_callers() {
        let guard = Arc::new(OnceGuard::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let guard = guard.clone();
            handles.push(std::thread::spawn(move || guard.enter()));
        }
        let entered: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(entered, 1);
    }
}
