//! Slow trade severity score
//!
//! 0 means no anomaly, 100 an extremely slow trade.
//! Each layer contributes 45 points and a positive time-series z-score
//! adds up to 10 more, saturating at z >= 5.

use crate::instrument::AnnotatedInstrument;
use serde::Serialize;

/// Points for a cross-sectional outlier
pub const CROSS_POINTS: u8 = 45;

/// Points for a time-series outlier
pub const TS_POINTS: u8 = 45;

/// Cap on the z-score bonus
pub const MAX_Z_POINTS: u8 = 10;

/// z-score at which the bonus saturates
pub const Z_SATURATION: f64 = 5.0;

/// Combine anomaly flags and z-score into a 0-100 score
///
/// Total for every input: a missing, negative or non-finite z adds nothing.
///
/// # Example
/// ```
/// use slow_trade_detector::score::slow_trade_score;
///
/// assert_eq!(slow_trade_score(true, true, Some(10.0)), 100);
/// assert_eq!(slow_trade_score(true, false, None), 45);
/// assert_eq!(slow_trade_score(false, false, Some(-3.0)), 0);
/// ```
pub fn slow_trade_score(cross_anomaly: bool, ts_anomaly: bool, zscore: Option<f64>) -> u8 {
    let mut score: u32 = 0;

    if cross_anomaly {
        score += u32::from(CROSS_POINTS);
    }
    if ts_anomaly {
        score += u32::from(TS_POINTS);
    }

    let z = zscore.filter(|z| z.is_finite()).unwrap_or(0.0).max(0.0);
    let bonus = (z / Z_SATURATION * f64::from(MAX_Z_POINTS)).floor();
    score += (bonus as u32).min(u32::from(MAX_Z_POINTS));

    score.min(100) as u8
}

/// An annotated instrument with its severity score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredInstrument {
    pub row: AnnotatedInstrument,
    pub slow_score: u8,
}

impl ScoredInstrument {
    pub fn score(row: AnnotatedInstrument) -> Self {
        let slow_score = slow_trade_score(row.cross_anomaly, row.ts_anomaly, row.zscore_cpu());
        Self { row, slow_score }
    }
}

/// Score every row, preserving order
pub fn score_instruments(rows: Vec<AnnotatedInstrument>) -> Vec<ScoredInstrument> {
    rows.into_iter().map(ScoredInstrument::score).collect()
}

/// Score distribution summary for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreSummary {
    pub scored: usize,
    pub slow_trades: usize,
    pub max_score: u8,
}

impl ScoreSummary {
    pub fn from_scored(rows: &[ScoredInstrument]) -> Self {
        Self {
            scored: rows.len(),
            slow_trades: rows.iter().filter(|r| r.row.slow_trade).count(),
            max_score: rows.iter().map(|r| r.slow_score).max().unwrap_or(0),
        }
    }
}
