use anyhow::{bail, Context, Result};
use clap::Parser;
use slow_trade_detector::{
    cli::{Cli, OutputFormat},
    config::DetectorConfig,
    loader,
    output::{self, CsvTable},
    pipeline::{FallbackSource, InMemorySource, InstrumentSource, Pipeline, PipelineReport},
    synthetic::{synthetic_batches, SyntheticSource},
    weekly::attach_weekly_baseline,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` forces TRACE, otherwise RUST_LOG (default warn)
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Profile from --config (or defaults) with per-flag overrides applied
fn build_config(args: &Cli) -> Result<DetectorConfig> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DetectorConfig::default(),
    };

    if let Some(window) = args.window {
        config.rolling_window = window;
    }
    if let Some(min) = args.min_batch_history {
        config.min_batch_history = min;
    }
    if let Some(min) = args.min_instrument_history {
        config.min_instrument_history = min;
    }
    if let Some(threshold) = args.threshold {
        config.zscore_threshold = threshold;
    }

    Ok(config)
}

fn load_instruments(path: &Path) -> Result<InMemorySource> {
    let records = loader::load_instrument_file(path)
        .with_context(|| format!("failed to load instrument table {}", path.display()))?;
    Ok(InMemorySource::new(records))
}

fn run_pipeline(args: &Cli, pipeline: &Pipeline) -> Result<PipelineReport> {
    let batches = if args.synthetic {
        synthetic_batches(args.seed)
    } else {
        let Some(path) = &args.batch else {
            bail!("--batch <FILE> is required unless --synthetic is given");
        };
        loader::load_batch_file(path)
            .with_context(|| format!("failed to load batch table {}", path.display()))?
    };

    if args.batch_only {
        return Ok(pipeline.run_batch_only(&batches)?);
    }

    let primary: Box<dyn InstrumentSource> = if args.synthetic {
        Box::new(SyntheticSource::new(args.seed))
    } else {
        let Some(path) = &args.instruments else {
            bail!("--instruments <FILE> is required unless --batch-only or --synthetic is given");
        };
        Box::new(load_instruments(path)?)
    };

    let source: Box<dyn InstrumentSource> = match &args.fallback_instruments {
        Some(path) => Box::new(FallbackSource::new(primary, load_instruments(path)?)),
        None => primary,
    };

    Ok(pipeline.run(&batches, source.as_ref())?)
}

fn write_report(args: &Cli, report: &PipelineReport) -> Result<()> {
    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("failed to create output file {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    match args.format {
        OutputFormat::Text => output::write_text(report, &mut writer)?,
        OutputFormat::Json => output::write_json(report, &mut writer)?,
        OutputFormat::Csv => {
            let table = if args.batch_only {
                CsvTable::Batches
            } else {
                CsvTable::Instruments
            };
            output::write_csv(report, table, &mut writer)?
        }
    }
    writer.flush().context("failed to flush output")?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = build_config(&args)?;
    let pipeline = Pipeline::new(config).context("invalid detector profile")?;

    let mut report = run_pipeline(&args, &pipeline)?;
    if args.weekly_baseline {
        attach_weekly_baseline(&mut report.batches);
    }

    write_report(&args, &report)
}
