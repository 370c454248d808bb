//! Temporal constraint evaluation
//!
//! A [`Constraint`] restricts when a user, role assignment or admin role
//! assignment may be used. Fields mirror the directory representation:
//!
//! - `begin_time` / `end_time`: `HHMM`, 24h clock, window `[begin, end)`; when
//!   `begin > end` the window wraps past midnight (`2200`..`0600` covers 23:00 and 05:59 but not 06:00)
//! - `begin_date` / `end_date`: `YYYYMMDD` or `none`
//! - `begin_lock_date` / `end_lock_date`: lock-out window `[begin, end)`
//! - `day_mask`: digits `1`..`7` (`1` = Sunday) or `all`
//! - `timeout`: maximum inactivity in seconds, `0` = unlimited
//!
//! Evaluation is pure: callers pass `now`, nothing reads the system clock.

use crate::error::{RbacError, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

const NONE_SENTINEL: &str = "none";
const ALL_DAYS: &str = "all";
const MIDNIGHT: &str = "0000";

/// Individual check performed by the evaluator, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintCheck {
    LockDate,
    Date,
    Day,
    Time,
    Timeout,
}

impl fmt::Display for ConstraintCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LockDate => "lock date",
            Self::Date => "date range",
            Self::Day => "day mask",
            Self::Time => "time of day",
            Self::Timeout => "inactivity timeout",
        };
        f.write_str(label)
    }
}

/// Temporal constraint shared by users, role assignments and admin role assignments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_lock_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_lock_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_mask: Option<String>,

    /// Maximum inactivity in seconds (0 = unlimited)
    #[serde(default)]
    pub timeout: u64,
}

impl Constraint {
    /// Unconstrained
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_window(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.begin_time = Some(begin.into());
        self.end_time = Some(end.into());
        self
    }

    pub fn with_date_range(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.begin_date = Some(begin.into());
        self.end_date = Some(end.into());
        self
    }

    pub fn with_lock_window(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.begin_lock_date = Some(begin.into());
        self.end_lock_date = Some(end.into());
        self
    }

    pub fn with_day_mask(mut self, mask: impl Into<String>) -> Self {
        self.day_mask = Some(mask.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// True if any temporal field carries a real value
    pub fn is_set(&self) -> bool {
        self.timeout > 0
            || [
                &self.begin_time,
                &self.end_time,
                &self.begin_date,
                &self.end_date,
                &self.begin_lock_date,
                &self.end_lock_date,
                &self.day_mask,
            ]
            .into_iter()
            .any(|f| field(f).is_some())
    }

    /// Check that every set field is well-formed
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [("begin_time", &self.begin_time), ("end_time", &self.end_time)] {
            if let Some(raw) = field(value) {
                parse_hhmm(raw).ok_or_else(|| {
                    RbacError::Validation(format!("{} '{}' is not HHMM", label, raw))
                })?;
            }
        }

        for (label, value) in [
            ("begin_date", &self.begin_date),
            ("end_date", &self.end_date),
            ("begin_lock_date", &self.begin_lock_date),
            ("end_lock_date", &self.end_lock_date),
        ] {
            if let Some(raw) = field(value) {
                parse_date(raw).ok_or_else(|| {
                    RbacError::Validation(format!("{} '{}' is not YYYYMMDD", label, raw))
                })?;
            }
        }

        if let Some(mask) = field(&self.day_mask) {
            if !mask.eq_ignore_ascii_case(ALL_DAYS) && !mask.chars().all(|c| ('1'..='7').contains(&c)) {
                return Err(RbacError::Validation(format!(
                    "day_mask '{}' must be digits 1-7 or 'all'",
                    mask
                )));
            }
        }

        Ok(())
    }
}

/// Decide whether `constraint` is satisfied at `now`
pub fn is_currently_valid(constraint: &Constraint, now: NaiveDateTime) -> bool {
    first_failed_check(constraint, now).is_none()
}

/// First failing check, in order lock date, date range, day mask, time of day
///
/// Malformed fields fail closed.
pub fn first_failed_check(constraint: &Constraint, now: NaiveDateTime) -> Option<ConstraintCheck> {
    let today = now.date();

    if is_locked(constraint, today) {
        return Some(ConstraintCheck::LockDate);
    }
    if !date_in_range(constraint, today) {
        return Some(ConstraintCheck::Date);
    }
    if !day_allowed(constraint, now) {
        return Some(ConstraintCheck::Day);
    }
    if !time_in_window(constraint, now) {
        return Some(ConstraintCheck::Time);
    }
    None
}

/// True if the inactivity timeout elapsed between `last_access` and `now`
pub fn is_timed_out(constraint: &Constraint, last_access: NaiveDateTime, now: NaiveDateTime) -> bool {
    if constraint.timeout == 0 {
        return false;
    }
    let idle = now.signed_duration_since(last_access).num_seconds();
    idle > constraint.timeout as i64
}

fn field(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(NONE_SENTINEL))
}

fn parse_hhmm(raw: &str) -> Option<u32> {
    if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = raw.parse().ok()?;
    let (hours, minutes) = (value / 100, value % 100);
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

fn parse_or_fail_closed(raw: &str, label: &str) -> Option<NaiveDate> {
    let parsed = parse_date(raw);
    if parsed.is_none() {
        warn!("Malformed {} '{}', treating constraint as unsatisfied", label, raw);
    }
    parsed
}

fn is_locked(constraint: &Constraint, today: NaiveDate) -> bool {
    let Some(begin_raw) = field(&constraint.begin_lock_date) else {
        return false;
    };
    let Some(begin) = parse_or_fail_closed(begin_raw, "begin_lock_date") else {
        return true;
    };
    if today < begin {
        return false;
    }
    match field(&constraint.end_lock_date) {
        // open-ended lock
        None => true,
        Some(end_raw) => match parse_or_fail_closed(end_raw, "end_lock_date") {
            Some(end) => today < end,
            None => true,
        },
    }
}

fn date_in_range(constraint: &Constraint, today: NaiveDate) -> bool {
    if let Some(raw) = field(&constraint.begin_date) {
        match parse_or_fail_closed(raw, "begin_date") {
            Some(begin) if today >= begin => {}
            _ => return false,
        }
    }
    if let Some(raw) = field(&constraint.end_date) {
        match parse_or_fail_closed(raw, "end_date") {
            Some(end) if today <= end => {}
            _ => return false,
        }
    }
    true
}

fn day_allowed(constraint: &Constraint, now: NaiveDateTime) -> bool {
    let Some(mask) = field(&constraint.day_mask) else {
        return true;
    };
    if mask.eq_ignore_ascii_case(ALL_DAYS) {
        return true;
    }
    // chrono: Sunday = 1 .. Saturday = 7
    let digit = char::from_digit(now.weekday().number_from_sunday(), 10);
    digit.is_some_and(|d| mask.contains(d))
}

fn time_in_window(constraint: &Constraint, now: NaiveDateTime) -> bool {
    let begin_raw = field(&constraint.begin_time);
    let end_raw = field(&constraint.end_time);

    if begin_raw == Some(MIDNIGHT) && end_raw == Some(MIDNIGHT) {
        return true;
    }

    let current = now.hour() * 60 + now.minute();
    let parse = |raw: &str, label: &str| {
        let parsed = parse_hhmm(raw);
        if parsed.is_none() {
            warn!("Malformed {} '{}', treating constraint as unsatisfied", label, raw);
        }
        parsed
    };

    match (begin_raw, end_raw) {
        (None, None) => true,
        (Some(b), None) => parse(b, "begin_time").is_some_and(|begin| current >= begin),
        (None, Some(e)) => parse(e, "end_time").is_some_and(|end| current < end),
        (Some(b), Some(e)) => match (parse(b, "begin_time"), parse(e, "end_time")) {
            (Some(begin), Some(end)) if begin <= end => current >= begin && current < end,
            // window wraps past midnight, e.g. 2200-0600
            (Some(begin), Some(end)) => current >= begin || current < end,
            _ => false,
        },
    }
}
