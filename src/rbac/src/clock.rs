//! Injectable wall clock
//!
//! Temporal constraints are evaluated against local wall-clock time, so the
//! engine takes its notion of "now" from a [`Clock`] rather than calling
//! `chrono::Local::now()` directly.

use chrono::{Duration, NaiveDateTime};
use parking_lot::Mutex;

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// System local time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Manually driven clock for tests and replay
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}
