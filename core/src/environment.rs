//! Injected dependencies shared across components.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Production code uses [`SystemClock`]; tests inject a mock so reservation
/// expiry can be driven deterministically.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// System clock backed by [`Utc::now`]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
