//! Cancel-and-restart debounce timer
//!
//! Coalesces bursts of events (rapid viewport resizes) into a single action
//! that fires once after the inputs go quiet for the configured window.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Debouncer with a configurable quiescence window
///
/// Each `call` cancels any pending action and schedules the new one to run
/// after the window elapses. Only the last action of a burst ever runs.
pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Create a debouncer with the given quiescence window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `action`, cancelling any previously scheduled action
    ///
    /// Must be called from within a tokio runtime.
    pub fn call<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            action();
        });

        let mut pending = self.pending.lock();
        if let Some(prev) = pending.replace(handle) {
            prev.abort();
        }
    }

    /// Cancel any pending action without scheduling a new one
    pub fn cancel(&self) {
        if let Some(prev) = self.pending.lock().take() {
            prev.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
