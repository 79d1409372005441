//! Input records and the bridge artifact between the two stages
//!
//! Dates are normalized to `chrono::NaiveDate` by the loaders before any
//! record reaches a detector. Detectors never re-normalize.

use crate::error::{DetectError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Weekday};
use serde::Serialize;
use std::fmt;

/// Canonical day-level string form used for flagged pairs and reports
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One (date, phase) aggregate of computational work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    #[serde(rename = "eodDate")]
    pub date: NaiveDate,
    pub phase: String,
    pub total_grid_calls: u64,
    pub cpu_time_seconds: f64,
    /// Distinct instruments in the batch
    pub cnt: u64,
}

impl BatchRecord {
    pub fn new(
        date: NaiveDate,
        phase: impl Into<String>,
        total_grid_calls: u64,
        cpu_time_seconds: f64,
        cnt: u64,
    ) -> Self {
        Self {
            date,
            phase: phase.into(),
            total_grid_calls,
            cpu_time_seconds,
            cnt,
        }
    }

    /// CPU seconds per instrument; `None` when the batch has no instruments
    pub fn cpu_per_sec_id(&self) -> Option<f64> {
        guarded_ratio(self.cpu_time_seconds, self.cnt)
    }

    /// CPU seconds per grid call; `None` when no calls were made
    pub fn cpu_per_call(&self) -> Option<f64> {
        guarded_ratio(self.cpu_time_seconds, self.total_grid_calls)
    }

    pub fn day_of_week(&self) -> Weekday {
        chrono::Datelike::weekday(&self.date)
    }

    /// Reject values no loader should have produced
    pub fn validate(&self) -> Result<()> {
        if self.phase.is_empty() {
            return Err(DetectError::schema("phase", "empty phase label"));
        }
        if !self.cpu_time_seconds.is_finite() || self.cpu_time_seconds < 0.0 {
            return Err(DetectError::schema(
                "cpu_time_seconds",
                format!("expected finite value >= 0, got {}", self.cpu_time_seconds),
            ));
        }
        Ok(())
    }
}

/// One instrument's work inside a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentRecord {
    #[serde(rename = "eodDate")]
    pub date: NaiveDate,
    pub phase: String,
    #[serde(rename = "secId")]
    pub sec_id: String,
    pub num_calls: u64,
    pub cpu_time: f64,
}

impl InstrumentRecord {
    pub fn new(
        date: NaiveDate,
        phase: impl Into<String>,
        sec_id: impl Into<String>,
        num_calls: u64,
        cpu_time: f64,
    ) -> Self {
        Self {
            date,
            phase: phase.into(),
            sec_id: sec_id.into(),
            num_calls,
            cpu_time,
        }
    }

    /// Reject values no loader should have produced
    pub fn validate(&self) -> Result<()> {
        if self.sec_id.is_empty() {
            return Err(DetectError::schema("secId", "empty instrument identifier"));
        }
        if self.phase.is_empty() {
            return Err(DetectError::schema("phase", "empty phase label"));
        }
        if self.num_calls == 0 {
            return Err(DetectError::schema("num_calls", "expected >= 1, got 0"));
        }
        if !self.cpu_time.is_finite() || self.cpu_time < 0.0 {
            return Err(DetectError::schema(
                "cpu_time",
                format!("expected finite value >= 0, got {}", self.cpu_time),
            ));
        }
        Ok(())
    }
}

/// A (date, phase) whose batch signal warrants an instrument-level scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlaggedPair {
    #[serde(rename = "eodDate")]
    pub date: NaiveDate,
    pub phase: String,
}

impl FlaggedPair {
    pub fn new(date: NaiveDate, phase: impl Into<String>) -> Self {
        Self {
            date,
            phase: phase.into(),
        }
    }

    /// Canonical `YYYY-MM-DD` form of the pair's date
    pub fn eod_date(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    /// Whether an instrument record belongs to this batch
    pub fn contains(&self, record: &InstrumentRecord) -> bool {
        record.date == self.date && record.phase == self.phase
    }
}

impl fmt::Display for FlaggedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.eod_date(), self.phase)
    }
}

/// Normalize a loader-supplied date string to a calendar day
///
/// Accepts `YYYY-MM-DD`, a space- or `T`-separated timestamp with optional
/// fractional seconds, and RFC 3339. Time-of-day is discarded.
pub fn parse_eod_date(raw: &str) -> Result<NaiveDate> {
    let value = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        return Ok(date);
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(stamp.date());
        }
    }

    if let Ok(stamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(stamp.date_naive());
    }

    Err(DetectError::Date {
        value: value.to_string(),
    })
}

/// Ratio with an explicit undefined result instead of inf/NaN
pub(crate) fn guarded_ratio(numerator: f64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    let ratio = numerator / denominator as f64;
    ratio.is_finite().then_some(ratio)
}
