//! Utility modules for pagecast
//!
//! This module contains common utilities used across the codebase.

pub mod clock;
pub mod debounce;
pub mod once;
pub mod throttle;

pub use clock::{micros_to_ms, seconds_to_micros, unix_micros};
pub use debounce::Debouncer;
pub use once::OnceGuard;
pub use throttle::LogGate;
