//! Instrument-level slow trade detection
//!
//! Two independent layers, unioned into `slow_trade`:
//!
//! 1. Cross-sectional, per (date, phase): an instrument below the 25th
//!    percentile of call count and above the 90th percentile of CPU time
//!    relative to its peers on the same batch.
//! 2. Time-series, per secId: CPU time z-scored against the instrument's
//!    own trailing history.

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::records::InstrumentRecord;
use crate::rolling::{percentile_of, rolling_baselines, AnomalySignal, RollingBaseline};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Call-count percentile below which an instrument did "little work"
pub const CALLS_PERCENTILE: f64 = 0.25;

/// CPU percentile above which an instrument was "expensive"
pub const CPU_PERCENTILE: f64 = 0.90;

/// An instrument record with both layers' verdicts
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedInstrument {
    pub record: InstrumentRecord,
    pub cross_anomaly: bool,
    /// Rolling CPU baseline over the instrument's own history
    pub cpu_baseline: RollingBaseline,
    pub ts_anomaly: bool,
    pub slow_trade: bool,
}

impl AnnotatedInstrument {
    pub fn zscore_cpu(&self) -> Option<f64> {
        self.cpu_baseline.zscore
    }
}

/// Annotated instrument table, in input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentDetection {
    pub rows: Vec<AnnotatedInstrument>,
}

impl InstrumentDetection {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn slow_trades(&self) -> impl Iterator<Item = &AnnotatedInstrument> {
        self.rows.iter().filter(|row| row.slow_trade)
    }
}

/// Detect slow trades among instrument records
///
/// Callers are expected to pass only instruments belonging to flagged
/// pairs. Any subset is accepted and evaluated deterministically.
pub fn detect_instrument_anomalies(
    records: &[InstrumentRecord],
    config: &DetectorConfig,
) -> Result<InstrumentDetection> {
    config.validate()?;
    for record in records {
        record.validate()?;
    }

    if records.is_empty() {
        tracing::debug!("instrument stage received no records");
        return Ok(InstrumentDetection::default());
    }

    let cross = cross_sectional_flags(records);
    let baselines = time_series_baselines(records, config);

    let rows: Vec<AnnotatedInstrument> = records
        .iter()
        .zip(cross)
        .zip(baselines)
        .map(|((record, cross_anomaly), cpu_baseline)| {
            let ts_anomaly = AnomalySignal::from_zscore(cpu_baseline.zscore, config.zscore_threshold)
                .is_anomalous();
            AnnotatedInstrument {
                record: record.clone(),
                cross_anomaly,
                cpu_baseline,
                ts_anomaly,
                slow_trade: cross_anomaly || ts_anomaly,
            }
        })
        .collect();

    let detection = InstrumentDetection { rows };
    tracing::info!(
        "instrument stage: {} of {} instruments flagged as slow trades",
        detection.slow_trades().count(),
        detection.rows.len()
    );
    Ok(detection)
}

/// Cross-sectional verdict per input row
pub fn cross_sectional_flags(records: &[InstrumentRecord]) -> Vec<bool> {
    let mut partitions: BTreeMap<(NaiveDate, &str), Vec<usize>> = BTreeMap::new();
    for (ordinal, record) in records.iter().enumerate() {
        partitions
            .entry((record.date, record.phase.as_str()))
            .or_default()
            .push(ordinal);
    }
    tracing::debug!("cross-sectional layer: {} partitions", partitions.len());

    let partitions: Vec<Vec<usize>> = partitions.into_values().collect();
    let flagged: Vec<usize> = partitions
        .into_par_iter()
        .map(|ordinals| cross_check(records, &ordinals))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    let mut flags = vec![false; records.len()];
    for ordinal in flagged {
        flags[ordinal] = true;
    }
    flags
}

/// Ordinals inside one (date, phase) partition that are cross-sectional outliers
fn cross_check(records: &[InstrumentRecord], ordinals: &[usize]) -> Vec<usize> {
    // percentiles are meaningless on a single instrument
    if ordinals.len() < 2 {
        return Vec::new();
    }

    let calls_cut = percentile_of(
        ordinals.iter().map(|&i| records[i].num_calls as f64),
        CALLS_PERCENTILE,
    );
    let cpu_cut = percentile_of(ordinals.iter().map(|&i| records[i].cpu_time), CPU_PERCENTILE);

    let (Some(calls_cut), Some(cpu_cut)) = (calls_cut, cpu_cut) else {
        return Vec::new();
    };

    ordinals
        .iter()
        .copied()
        .filter(|&i| {
            let record = &records[i];
            (record.num_calls as f64) < calls_cut && record.cpu_time > cpu_cut
        })
        .collect()
}

/// Rolling CPU baseline per input row, computed per secId
///
/// All rows are first sorted globally by (secId, date) so each instrument's
/// window sees its own chronological history regardless of input order.
pub fn time_series_baselines(
    records: &[InstrumentRecord],
    config: &DetectorConfig,
) -> Vec<RollingBaseline> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|a, b| by_instrument_then_date(&records[*a], &records[*b]));

    let series: Vec<&[usize]> = order
        .chunk_by(|a, b| records[*a].sec_id == records[*b].sec_id)
        .collect();
    tracing::debug!("time-series layer: {} instruments", series.len());

    let computed: Vec<Vec<(usize, RollingBaseline)>> = series
        .into_par_iter()
        .map(|ordinals| {
            let cpu: Vec<Option<f64>> = ordinals
                .iter()
                .map(|&i| Some(records[i].cpu_time))
                .collect();
            let baselines =
                rolling_baselines(&cpu, config.rolling_window, config.min_instrument_history);
            ordinals.iter().copied().zip(baselines).collect()
        })
        .collect();

    let mut baselines = vec![RollingBaseline::default(); records.len()];
    for (ordinal, baseline) in computed.into_iter().flatten() {
        baselines[ordinal] = baseline;
    }
    baselines
}

fn by_instrument_then_date(a: &InstrumentRecord, b: &InstrumentRecord) -> Ordering {
    a.sec_id
        .cmp(&b.sec_id)
        .then(a.date.cmp(&b.date))
        .then(a.phase.cmp(&b.phase))
        .then(a.num_calls.cmp(&b.num_calls))
        .then(a.cpu_time.total_cmp(&b.cpu_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, n).unwrap()
    }

    fn inst(d: u32, sec: &str, calls: u64, cpu: f64) -> InstrumentRecord {
        InstrumentRecord::new(day(d), "A", sec, calls, cpu)
    }

    #[test]
    fn test_empty_input() {
        let result = detect_instrument_anomalies(&[], &DetectorConfig::default()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_singleton_partition_never_cross_anomalous() {
        let records = vec![inst(1, "S001", 1, 1000.0)];
        assert_eq!(cross_sectional_flags(&records), vec![false]);
    }

    #[test]
    fn test_pair_partition_uses_percentile_rule() {
        // p25(calls) = 1 + 0.25 * 9 = 3.25, p90(cpu) = 10 + 0.9 * 40 = 46
        let records = vec![inst(1, "S001", 1, 50.0), inst(1, "S002", 10, 10.0)];
        assert_eq!(cross_sectional_flags(&records), vec![true, false]);
    }

    #[test]
    fn test_all_equal_partition_is_not_anomalous() {
        let records: Vec<_> = (0..5)
            .map(|i| inst(1, &format!("S{:03}", i), 4, 7.3))
            .collect();
        assert!(cross_sectional_flags(&records).iter().all(|flag| !flag));
    }

    #[test]
    fn test_cross_partitions_by_date_and_phase() {
        let mut records = vec![inst(1, "S001", 1, 50.0), inst(1, "S002", 10, 10.0)];
        // same instruments on another phase: the cheap one is alone there
        records.push(InstrumentRecord::new(day(1), "B", "S003", 1, 50.0));
        assert_eq!(cross_sectional_flags(&records), vec![true, false, false]);
    }

    #[test]
    fn test_time_series_spike() {
        let cpu = [10.0, 10.5, 9.5, 10.2, 9.8, 10.1, 60.0];
        let records: Vec<_> = cpu
            .iter()
            .enumerate()
            .map(|(i, &c)| inst(i as u32 + 1, "S001", 5, c))
            .collect();
        let result = detect_instrument_anomalies(&records, &DetectorConfig::default()).unwrap();

        assert!(result.rows[6].ts_anomaly);
        assert!(result.rows[6].slow_trade);
        assert!(!result.rows[6].cross_anomaly);
        assert!(result.rows[..6].iter().all(|row| !row.ts_anomaly));
        assert_eq!(result.rows[0].zscore_cpu(), None);
        assert_eq!(result.rows[1].zscore_cpu(), None);
    }

    #[test]
    fn test_time_series_ignores_input_interleaving() {
        let mut records = Vec::new();
        for d in 1..=6 {
            records.push(inst(d, "S001", 5, 10.0 + d as f64));
            records.push(inst(d, "S002", 5, 100.0 - d as f64));
        }
        let forward = time_series_baselines(&records, &DetectorConfig::default());

        let mut shuffled: Vec<usize> = (0..records.len()).collect();
        shuffled.reverse();
        let reversed_records: Vec<_> = shuffled.iter().map(|&i| records[i].clone()).collect();
        let backward = time_series_baselines(&reversed_records, &DetectorConfig::default());

        for (position, &original) in shuffled.iter().enumerate() {
            assert_eq!(backward[position], forward[original]);
        }
    }

    #[test]
    fn test_zero_calls_is_schema_error() {
        let records = vec![inst(1, "S001", 0, 1.0)];
        let err = detect_instrument_anomalies(&records, &DetectorConfig::default()).unwrap_err();
        assert_eq!(err.field(), Some("num_calls"));
    }
}
