//! Batch-level anomaly detection (one row per date × phase)
//!
//! Each phase is an independent partition: sort by date, compute trailing
//! baselines for three metrics, flag the row when any metric's z-score is
//! above the threshold. Rows come back in input order, joined on their
//! input ordinal rather than on position inside a partition.

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::records::{BatchRecord, FlaggedPair};
use crate::rolling::{rolling_baselines, AnomalySignal, RollingBaseline};
use chrono::Weekday;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// The three batch metrics that are z-scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchMetric {
    CpuTimeSeconds,
    CpuPerSecId,
    TotalGridCalls,
}

impl BatchMetric {
    pub const ALL: [BatchMetric; 3] = [
        BatchMetric::CpuTimeSeconds,
        BatchMetric::CpuPerSecId,
        BatchMetric::TotalGridCalls,
    ];

    /// Column prefix used in the annotated table
    pub fn column(self) -> &'static str {
        match self {
            BatchMetric::CpuTimeSeconds => "cpu_time_seconds",
            BatchMetric::CpuPerSecId => "cpu_per_secId",
            BatchMetric::TotalGridCalls => "total_grid_calls",
        }
    }

    fn value(self, record: &BatchRecord) -> Option<f64> {
        match self {
            BatchMetric::CpuTimeSeconds => Some(record.cpu_time_seconds),
            BatchMetric::CpuPerSecId => record.cpu_per_sec_id(),
            BatchMetric::TotalGridCalls => Some(record.total_grid_calls as f64),
        }
    }
}

/// A batch record with its derived ratios, baselines and verdict
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedBatch {
    pub record: BatchRecord,
    pub day_of_week: Weekday,
    pub cpu_per_sec_id: Option<f64>,
    pub cpu_per_call: Option<f64>,
    pub cpu_time_seconds_baseline: RollingBaseline,
    pub cpu_per_sec_id_baseline: RollingBaseline,
    pub total_grid_calls_baseline: RollingBaseline,
    pub batch_anomaly: bool,
    /// Median CPU for this phase on this weekday, once attached
    pub dow_cpu_median: Option<f64>,
}

impl AnnotatedBatch {
    pub fn baseline(&self, metric: BatchMetric) -> &RollingBaseline {
        match metric {
            BatchMetric::CpuTimeSeconds => &self.cpu_time_seconds_baseline,
            BatchMetric::CpuPerSecId => &self.cpu_per_sec_id_baseline,
            BatchMetric::TotalGridCalls => &self.total_grid_calls_baseline,
        }
    }

    pub fn signal(&self, metric: BatchMetric, threshold: f64) -> AnomalySignal {
        AnomalySignal::from_zscore(self.baseline(metric).zscore, threshold)
    }

    pub fn flagged_pair(&self) -> FlaggedPair {
        FlaggedPair::new(self.record.date, self.record.phase.clone())
    }
}

/// Annotated table plus the pairs that need an instrument-level scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDetection {
    pub rows: Vec<AnnotatedBatch>,
    pub flagged: Vec<FlaggedPair>,
}

/// Detect anomalous batches
///
/// Empty input yields an empty table and no flagged pairs.
///
/// # Example
/// ```
/// use slow_trade_detector::batch::detect_batch_anomalies;
/// use slow_trade_detector::config::DetectorConfig;
///
/// let result = detect_batch_anomalies(&[], &DetectorConfig::default()).unwrap();
/// assert!(result.rows.is_empty());
/// assert!(result.flagged.is_empty());
/// ```
pub fn detect_batch_anomalies(
    records: &[BatchRecord],
    config: &DetectorConfig,
) -> Result<BatchDetection> {
    config.validate()?;
    for record in records {
        record.validate()?;
    }

    if records.is_empty() {
        tracing::debug!("batch stage received no records");
        return Ok(BatchDetection::default());
    }

    let mut partitions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (ordinal, record) in records.iter().enumerate() {
        partitions
            .entry(record.phase.as_str())
            .or_default()
            .push(ordinal);
    }
    tracing::debug!(
        "batch stage: {} rows across {} phases",
        records.len(),
        partitions.len()
    );

    let partitions: Vec<Vec<usize>> = partitions.into_values().collect();
    let mut annotated: Vec<(usize, AnnotatedBatch)> = partitions
        .into_par_iter()
        .map(|ordinals| annotate_phase(records, ordinals, config))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();
    annotated.sort_by_key(|(ordinal, _)| *ordinal);

    let rows: Vec<AnnotatedBatch> = annotated.into_iter().map(|(_, row)| row).collect();
    let flagged = flagged_pairs(&rows);

    tracing::info!(
        "batch stage: {} of {} batches anomalous, {} pairs flagged",
        rows.iter().filter(|row| row.batch_anomaly).count(),
        rows.len(),
        flagged.len()
    );

    Ok(BatchDetection { rows, flagged })
}

/// Distinct flagged pairs in first-encounter order
pub fn flagged_pairs(rows: &[AnnotatedBatch]) -> Vec<FlaggedPair> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|row| row.batch_anomaly)
        .map(AnnotatedBatch::flagged_pair)
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

fn annotate_phase(
    records: &[BatchRecord],
    mut ordinals: Vec<usize>,
    config: &DetectorConfig,
) -> Vec<(usize, AnnotatedBatch)> {
    ordinals.sort_by(|a, b| chronological(&records[*a], &records[*b]));

    let series = |metric: BatchMetric| {
        let values: Vec<Option<f64>> = ordinals
            .iter()
            .map(|&ordinal| metric.value(&records[ordinal]))
            .collect();
        rolling_baselines(&values, config.rolling_window, config.min_batch_history)
    };
    let cpu = series(BatchMetric::CpuTimeSeconds);
    let per_sec_id = series(BatchMetric::CpuPerSecId);
    let calls = series(BatchMetric::TotalGridCalls);

    ordinals
        .iter()
        .enumerate()
        .map(|(position, &ordinal)| {
            let record = &records[ordinal];
            let mut row = AnnotatedBatch {
                record: record.clone(),
                day_of_week: record.day_of_week(),
                cpu_per_sec_id: record.cpu_per_sec_id(),
                cpu_per_call: record.cpu_per_call(),
                cpu_time_seconds_baseline: cpu[position],
                cpu_per_sec_id_baseline: per_sec_id[position],
                total_grid_calls_baseline: calls[position],
                batch_anomaly: false,
                dow_cpu_median: None,
            };
            row.batch_anomaly = BatchMetric::ALL
                .iter()
                .any(|&metric| row.signal(metric, config.zscore_threshold).is_anomalous());
            (ordinal, row)
        })
        .collect()
}

/// Date ascending; remaining fields break ties so row order never matters
fn chronological(a: &BatchRecord, b: &BatchRecord) -> Ordering {
    a.date
        .cmp(&b.date)
        .then(a.total_grid_calls.cmp(&b.total_grid_calls))
        .then(a.cpu_time_seconds.total_cmp(&b.cpu_time_seconds))
        .then(a.cnt.cmp(&b.cnt))
}
