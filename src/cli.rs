//! CLI argument parsing for slow-trade-detector

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for detection results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "slow-trade-detector")]
#[command(version)]
#[command(
    about = "Two-stage slow trade detection: batch anomaly screen, then instrument scan",
    long_about = None
)]
pub struct Cli {
    /// Batch table (CSV or JSON, one row per date × phase)
    #[arg(short, long, value_name = "FILE", required_unless_present = "synthetic")]
    pub batch: Option<PathBuf>,

    /// Instrument table used as the source for flagged pairs
    #[arg(short, long, value_name = "FILE", conflicts_with = "synthetic")]
    pub instruments: Option<PathBuf>,

    /// Instrument table consulted when the primary source fails or has no rows for a pair
    #[arg(long, value_name = "FILE")]
    pub fallback_instruments: Option<PathBuf>,

    /// Run on seeded synthetic data instead of input files
    #[arg(long, conflicts_with = "batch")]
    pub synthetic: bool,

    /// Seed for --synthetic
    #[arg(long, value_name = "N", default_value = "42")]
    pub seed: u64,

    /// TOML detector profile
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Rolling window length in rows (overrides profile)
    #[arg(short, long, value_name = "ROWS")]
    pub window: Option<usize>,

    /// Minimum batch history before a z-score is defined (overrides profile)
    #[arg(long, value_name = "ROWS")]
    pub min_batch_history: Option<usize>,

    /// Minimum instrument history before a z-score is defined (overrides profile)
    #[arg(long, value_name = "ROWS")]
    pub min_instrument_history: Option<usize>,

    /// Z-score threshold, strictly exceeded to flag (overrides profile)
    #[arg(short, long, value_name = "SIGMA")]
    pub threshold: Option<f64>,

    /// Attach the day-of-week CPU median to every batch row
    #[arg(long)]
    pub weekly_baseline: bool,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Write output to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Stop after the batch stage
    #[arg(long)]
    pub batch_only: bool,

    /// Enable debug tracing output to stderr
    #[arg(long)]
    pub debug: bool,
}
