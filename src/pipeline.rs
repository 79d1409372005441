//! Two-stage funnel: batch screen, then instrument scan of flagged pairs only
//!
//! ```text
//! Unscanned -> BatchEvaluated -> NotFlagged                        (terminal)
//!                             -> Flagged -> InstrumentEvaluated -> Scored
//! ```
//!
//! The orchestrator never fetches instrument data on its own initiative.
//! [`Pipeline::run`] asks an [`InstrumentSource`] for exactly the flagged
//! pairs and nothing else.

use crate::batch::{detect_batch_anomalies, AnnotatedBatch, BatchDetection};
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::instrument::{detect_instrument_anomalies, InstrumentDetection};
use crate::records::{BatchRecord, FlaggedPair, InstrumentRecord};
use crate::score::{score_instruments, ScoreSummary, ScoredInstrument};

/// External collaborator that delivers the instruments of one batch
pub trait InstrumentSource {
    fn fetch(&self, pair: &FlaggedPair) -> Result<Vec<InstrumentRecord>>;
}

impl<T: InstrumentSource + ?Sized> InstrumentSource for Box<T> {
    fn fetch(&self, pair: &FlaggedPair) -> Result<Vec<InstrumentRecord>> {
        (**self).fetch(pair)
    }
}

/// Source backed by an already-loaded instrument table
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<InstrumentRecord>,
}

impl InMemorySource {
    pub fn new(records: Vec<InstrumentRecord>) -> Self {
        Self { records }
    }
}

impl InstrumentSource for InMemorySource {
    fn fetch(&self, pair: &FlaggedPair) -> Result<Vec<InstrumentRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|record| pair.contains(record))
            .cloned()
            .collect())
    }
}

/// Tries `primary` first and falls back to `secondary` when the primary
/// fails or has no rows for the pair
#[derive(Debug, Clone)]
pub struct FallbackSource<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackSource<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: InstrumentSource, S: InstrumentSource> InstrumentSource for FallbackSource<P, S> {
    fn fetch(&self, pair: &FlaggedPair) -> Result<Vec<InstrumentRecord>> {
        match self.primary.fetch(pair) {
            Ok(records) if !records.is_empty() => Ok(records),
            Ok(_) => {
                tracing::debug!("primary source has no rows for {}, trying fallback", pair);
                self.secondary.fetch(pair)
            }
            Err(err) => {
                tracing::warn!("primary source failed for {}: {}; trying fallback", pair, err);
                self.secondary.fetch(pair)
            }
        }
    }
}

/// Result of the instrument stage
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentStage {
    /// No input rows; nothing was evaluated
    Empty,
    Evaluated(InstrumentDetection),
}

impl InstrumentStage {
    pub fn into_detection(self) -> Option<InstrumentDetection> {
        match self {
            InstrumentStage::Empty => None,
            InstrumentStage::Evaluated(detection) => Some(detection),
        }
    }
}

/// What happened to one flagged pair during [`Pipeline::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    Scanned { instruments: usize, slow_trades: usize },
    /// The source returned an error; the run went on without this pair
    FetchFailed(String),
    NoData,
}

/// Everything a reporting collaborator needs from one run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub config: DetectorConfig,
    pub batches: Vec<AnnotatedBatch>,
    pub flagged: Vec<FlaggedPair>,
    pub outcomes: Vec<(FlaggedPair, PairOutcome)>,
    pub instruments: Vec<ScoredInstrument>,
}

impl PipelineReport {
    pub fn batch_anomalies(&self) -> impl Iterator<Item = &AnnotatedBatch> {
        self.batches.iter().filter(|row| row.batch_anomaly)
    }

    pub fn slow_trades(&self) -> impl Iterator<Item = &ScoredInstrument> {
        self.instruments.iter().filter(|row| row.row.slow_trade)
    }

    pub fn summary(&self) -> ScoreSummary {
        ScoreSummary::from_scored(&self.instruments)
    }
}

/// Sequences the batch and instrument detectors under one profile
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: DetectorConfig,
}

impl Pipeline {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Batch stage: annotated table plus flagged (date, phase) pairs
    pub fn run_batch_stage(&self, records: &[BatchRecord]) -> Result<BatchDetection> {
        detect_batch_anomalies(records, &self.config)
    }

    /// Instrument stage over records already restricted to flagged pairs
    pub fn run_instrument_stage(&self, records: &[InstrumentRecord]) -> Result<InstrumentStage> {
        if records.is_empty() {
            return Ok(InstrumentStage::Empty);
        }
        detect_instrument_anomalies(records, &self.config).map(InstrumentStage::Evaluated)
    }

    /// Batch stage only, packaged as a report with no instrument results
    pub fn run_batch_only(&self, batch_records: &[BatchRecord]) -> Result<PipelineReport> {
        let BatchDetection { rows, flagged } = self.run_batch_stage(batch_records)?;
        Ok(PipelineReport {
            config: self.config.clone(),
            batches: rows,
            flagged,
            outcomes: Vec::new(),
            instruments: Vec::new(),
        })
    }

    /// Full gated funnel
    ///
    /// Every flagged pair is fetched in order. Pairs whose fetch returns no
    /// rows are recorded as [`PairOutcome::NoData`] and pairs whose fetch
    /// fails as [`PairOutcome::FetchFailed`]; neither stops the run. The rest
    /// are concatenated and evaluated in one instrument stage, so each
    /// instrument's time series spans all flagged batches it appears in.
    pub fn run(
        &self,
        batch_records: &[BatchRecord],
        source: &dyn InstrumentSource,
    ) -> Result<PipelineReport> {
        let BatchDetection { rows, flagged } = self.run_batch_stage(batch_records)?;

        let mut fetched = Vec::new();
        let mut spans = Vec::with_capacity(flagged.len());
        for pair in &flagged {
            let records = match source.fetch(pair) {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!("instrument fetch failed for {}: {}", pair, err);
                    spans.push(Err(err.to_string()));
                    continue;
                }
            };
            tracing::debug!("fetched {} instruments for {}", records.len(), pair);
            if records.is_empty() {
                tracing::warn!("no instrument data for flagged pair {}", pair);
            }
            spans.push(Ok(fetched.len()..fetched.len() + records.len()));
            fetched.extend(records);
        }

        let instruments = self
            .run_instrument_stage(&fetched)?
            .into_detection()
            .map(|detection| score_instruments(detection.rows))
            .unwrap_or_default();

        let outcomes = flagged
            .iter()
            .zip(spans)
            .map(|(pair, span)| {
                let outcome = match span {
                    Err(reason) => PairOutcome::FetchFailed(reason),
                    Ok(span) if span.is_empty() => PairOutcome::NoData,
                    Ok(span) => {
                        let scanned = &instruments[span];
                        PairOutcome::Scanned {
                            instruments: scanned.len(),
                            slow_trades: scanned.iter().filter(|r| r.row.slow_trade).count(),
                        }
                    }
                };
                (pair.clone(), outcome)
            })
            .collect();

        Ok(PipelineReport {
            config: self.config.clone(),
            batches: rows,
            flagged,
            outcomes,
            instruments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectError;
    use chrono::NaiveDate;
    use std::cell::RefCell;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, n).unwrap()
    }

    /// Records every pair it is asked for
    struct RecordingSource {
        inner: InMemorySource,
        asked: RefCell<Vec<FlaggedPair>>,
    }

    impl InstrumentSource for RecordingSource {
        fn fetch(&self, pair: &FlaggedPair) -> Result<Vec<InstrumentRecord>> {
            self.asked.borrow_mut().push(pair.clone());
            self.inner.fetch(pair)
        }
    }

    struct FailingSource;

    impl InstrumentSource for FailingSource {
        fn fetch(&self, _pair: &FlaggedPair) -> Result<Vec<InstrumentRecord>> {
            Err(DetectError::Io(std::io::Error::other("database unreachable")))
        }
    }

    fn spiky_batches() -> Vec<BatchRecord> {
        let cpu = [200.0, 202.0, 198.0, 201.0, 199.0, 203.0, 197.0, 1000.0];
        cpu.iter()
            .enumerate()
            .map(|(i, &c)| BatchRecord::new(day(i as u32 + 1), "A", 100, c, 50))
            .collect()
    }

    fn quiet_batches() -> Vec<BatchRecord> {
        (1..=8)
            .map(|d| BatchRecord::new(day(d), "A", 100, 200.0, 50))
            .collect()
    }

    #[test]
    fn test_instrument_stage_empty() {
        let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
        assert_eq!(
            pipeline.run_instrument_stage(&[]).unwrap(),
            InstrumentStage::Empty
        );
    }

    #[test]
    fn test_run_fetches_only_flagged_pairs() {
        let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
        let mut instruments = vec![
            InstrumentRecord::new(day(8), "A", "S001", 1, 50.0),
            InstrumentRecord::new(day(8), "A", "S002", 10, 10.0),
        ];
        instruments.push(InstrumentRecord::new(day(3), "A", "S001", 1, 50.0));
        let source = RecordingSource {
            inner: InMemorySource::new(instruments),
            asked: RefCell::new(Vec::new()),
        };

        let report = pipeline.run(&spiky_batches(), &source).unwrap();

        assert_eq!(*source.asked.borrow(), vec![FlaggedPair::new(day(8), "A")]);
        assert_eq!(report.instruments.len(), 2);
        assert_eq!(report.slow_trades().count(), 1);
        assert_eq!(report.instruments[0].slow_score, 45);
        assert_eq!(
            report.outcomes,
            vec![(
                FlaggedPair::new(day(8), "A"),
                PairOutcome::Scanned {
                    instruments: 2,
                    slow_trades: 1
                }
            )]
        );
    }

    #[test]
    fn test_run_without_flags_never_fetches() {
        let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
        let report = pipeline.run(&quiet_batches(), &FailingSource).unwrap();
        assert!(report.flagged.is_empty());
        assert!(report.instruments.is_empty());
        assert_eq!(report.batches.len(), 8);
    }

    #[test]
    fn test_run_records_missing_data() {
        let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
        let report = pipeline
            .run(&spiky_batches(), &InMemorySource::default())
            .unwrap();
        assert_eq!(
            report.outcomes,
            vec![(FlaggedPair::new(day(8), "A"), PairOutcome::NoData)]
        );
    }

    /// Fails for phase B only
    struct PhaseBDown(InMemorySource);

    impl InstrumentSource for PhaseBDown {
        fn fetch(&self, pair: &FlaggedPair) -> Result<Vec<InstrumentRecord>> {
            if pair.phase == "B" {
                return Err(DetectError::Io(std::io::Error::other("database unreachable")));
            }
            self.0.fetch(pair)
        }
    }

    fn two_phase_spike() -> Vec<BatchRecord> {
        let mut batches = spiky_batches();
        let cpu = [300.0, 303.0, 297.0, 301.0, 299.0, 302.0, 298.0, 1500.0];
        batches.extend(
            cpu.iter()
                .enumerate()
                .map(|(i, &c)| BatchRecord::new(day(i as u32 + 1), "B", 100, c, 50)),
        );
        batches
    }

    #[test]
    fn test_run_continues_past_failed_fetch() {
        let instruments = vec![
            InstrumentRecord::new(day(8), "A", "S001", 1, 50.0),
            InstrumentRecord::new(day(8), "A", "S002", 10, 10.0),
            InstrumentRecord::new(day(8), "B", "S003", 10, 10.0),
        ];
        let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
        let report = pipeline
            .run(&two_phase_spike(), &PhaseBDown(InMemorySource::new(instruments)))
            .unwrap();

        assert_eq!(report.batches.len(), 16);
        assert_eq!(report.flagged.len(), 2);
        assert_eq!(report.instruments.len(), 2);
        assert!(report.instruments.iter().all(|r| r.row.record.phase == "A"));
        assert_eq!(
            report.outcomes[0],
            (
                FlaggedPair::new(day(8), "A"),
                PairOutcome::Scanned {
                    instruments: 2,
                    slow_trades: 1
                }
            )
        );
        assert_eq!(report.outcomes[1].0, FlaggedPair::new(day(8), "B"));
        match &report.outcomes[1].1 {
            PairOutcome::FetchFailed(reason) => assert!(reason.contains("database unreachable")),
            other => panic!("expected FetchFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_run_all_fetches_failing_keeps_batch_results() {
        let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
        let report = pipeline.run(&spiky_batches(), &FailingSource).unwrap();
        assert_eq!(report.batches.len(), 8);
        let anomalous: Vec<_> = report.batch_anomalies().map(|row| row.flagged_pair()).collect();
        assert_eq!(anomalous, vec![FlaggedPair::new(day(8), "A")]);
        assert!(report.instruments.is_empty());
        assert!(matches!(report.outcomes[0].1, PairOutcome::FetchFailed(_)));
    }

    #[test]
    fn test_fallback_source_after_error() {
        let backup = InMemorySource::new(vec![InstrumentRecord::new(day(8), "B", "S003", 10, 10.0)]);
        let source = FallbackSource::new(FailingSource, backup);
        let rows = source.fetch(&FlaggedPair::new(day(8), "B")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sec_id, "S003");
    }

    #[test]
    fn test_fallback_source_prefers_primary_rows() {
        let primary = InMemorySource::new(vec![InstrumentRecord::new(day(8), "A", "P001", 1, 1.0)]);
        let backup = InMemorySource::new(vec![
            InstrumentRecord::new(day(8), "A", "F001", 1, 1.0),
            InstrumentRecord::new(day(8), "B", "F002", 1, 1.0),
        ]);
        let source = FallbackSource::new(primary, backup);

        let a = source.fetch(&FlaggedPair::new(day(8), "A")).unwrap();
        assert_eq!(a[0].sec_id, "P001");
        // primary has nothing for B
        let b = source.fetch(&FlaggedPair::new(day(8), "B")).unwrap();
        assert_eq!(b[0].sec_id, "F002");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DetectorConfig {
            rolling_window: 0,
            ..DetectorConfig::default()
        };
        assert!(Pipeline::new(config).is_err());
    }

    #[test]
    fn test_run_builds_history_across_flagged_pairs() {
        // two phases spiking on different days, one instrument in both
        let mut batches = spiky_batches();
        let cpu = [300.0, 303.0, 297.0, 301.0, 299.0, 1500.0];
        batches.extend(
            cpu.iter()
                .enumerate()
                .map(|(i, &c)| BatchRecord::new(day(i as u32 + 1), "B", 100, c, 50)),
        );
        let instruments = vec![
            InstrumentRecord::new(day(6), "B", "S001", 5, 10.0),
            InstrumentRecord::new(day(8), "A", "S001", 5, 10.0),
        ];
        let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
        let report = pipeline
            .run(&batches, &InMemorySource::new(instruments))
            .unwrap();

        assert_eq!(
            report.flagged,
            vec![FlaggedPair::new(day(8), "A"), FlaggedPair::new(day(6), "B")]
        );
        assert_eq!(report.instruments.len(), 2);
        assert_eq!(report.instruments[0].row.record.phase, "A");
        assert_eq!(report.instruments[1].row.record.phase, "B");
    }

    #[test]
    fn test_run_batch_only() {
        let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
        let report = pipeline.run_batch_only(&spiky_batches()).unwrap();
        assert_eq!(report.flagged, vec![FlaggedPair::new(day(8), "A")]);
        assert!(report.outcomes.is_empty());
        assert_eq!(report.summary().scored, 0);
    }
}
