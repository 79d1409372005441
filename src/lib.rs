//! slow-trade-detector - two-stage detection of slow trades in batch compute runs
//!
//! A cheap batch-level screen (rolling z-scores of CPU, CPU per instrument
//! and grid calls, per phase) decides which (date, phase) batches deserve a
//! closer look. Only those batches are scanned instrument by instrument,
//! combining a cross-sectional percentile check with each instrument's own
//! CPU time series, and every instrument gets a 0-100 severity score.
//!
//! # Example
//! ```
//! use slow_trade_detector::config::DetectorConfig;
//! use slow_trade_detector::pipeline::{InMemorySource, Pipeline};
//! use slow_trade_detector::synthetic::synthetic_batches;
//!
//! let pipeline = Pipeline::new(DetectorConfig::default()).unwrap();
//! let report = pipeline
//!     .run(&synthetic_batches(42), &InMemorySource::default())
//!     .unwrap();
//! assert_eq!(report.batches.len(), 60);
//! assert!(!report.flagged.is_empty());
//! ```

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod instrument;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod records;
pub mod rolling;
pub mod score;
pub mod synthetic;
pub mod weekly;
