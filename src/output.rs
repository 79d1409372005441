//! Report rendering: text summary, JSON document, CSV tables
//!
//! Column names follow the annotated table schema (`cpu_per_secId`,
//! `<metric>_roll_med`, `zscore_cpu`, ...). Undefined values are `null` in
//! JSON and empty cells in CSV.

use crate::batch::AnnotatedBatch;
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::pipeline::{PairOutcome, PipelineReport};
use crate::records::{FlaggedPair, DATE_FORMAT};
use crate::score::{ScoreSummary, ScoredInstrument};
use crate::weekly::day_name;
use chrono::NaiveDate;
use serde::Serialize;
use std::io::Write;

/// Which table a CSV export carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvTable {
    Batches,
    Instruments,
}

/// One row of the annotated batch table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRow<'a> {
    #[serde(rename = "eodDate")]
    pub eod_date: NaiveDate,
    pub phase: &'a str,
    pub total_grid_calls: u64,
    pub cpu_time_seconds: f64,
    pub cnt: u64,
    #[serde(rename = "cpu_per_secId")]
    pub cpu_per_sec_id: Option<f64>,
    pub cpu_per_call: Option<f64>,
    pub cpu_time_seconds_roll_med: Option<f64>,
    pub cpu_time_seconds_roll_std: Option<f64>,
    pub cpu_time_seconds_z: Option<f64>,
    #[serde(rename = "cpu_per_secId_roll_med")]
    pub cpu_per_sec_id_roll_med: Option<f64>,
    #[serde(rename = "cpu_per_secId_roll_std")]
    pub cpu_per_sec_id_roll_std: Option<f64>,
    #[serde(rename = "cpu_per_secId_z")]
    pub cpu_per_sec_id_z: Option<f64>,
    pub total_grid_calls_roll_med: Option<f64>,
    pub total_grid_calls_roll_std: Option<f64>,
    pub total_grid_calls_z: Option<f64>,
    pub batch_anomaly: bool,
    pub day_of_week: &'static str,
    pub dow_cpu_median: Option<f64>,
}

impl<'a> From<&'a AnnotatedBatch> for BatchRow<'a> {
    fn from(row: &'a AnnotatedBatch) -> Self {
        let cpu = &row.cpu_time_seconds_baseline;
        let per_sec_id = &row.cpu_per_sec_id_baseline;
        let calls = &row.total_grid_calls_baseline;
        Self {
            eod_date: row.record.date,
            phase: &row.record.phase,
            total_grid_calls: row.record.total_grid_calls,
            cpu_time_seconds: row.record.cpu_time_seconds,
            cnt: row.record.cnt,
            cpu_per_sec_id: row.cpu_per_sec_id,
            cpu_per_call: row.cpu_per_call,
            cpu_time_seconds_roll_med: cpu.median,
            cpu_time_seconds_roll_std: cpu.std,
            cpu_time_seconds_z: cpu.zscore,
            cpu_per_sec_id_roll_med: per_sec_id.median,
            cpu_per_sec_id_roll_std: per_sec_id.std,
            cpu_per_sec_id_z: per_sec_id.zscore,
            total_grid_calls_roll_med: calls.median,
            total_grid_calls_roll_std: calls.std,
            total_grid_calls_z: calls.zscore,
            batch_anomaly: row.batch_anomaly,
            day_of_week: day_name(row.day_of_week),
            dow_cpu_median: row.dow_cpu_median,
        }
    }
}

/// One row of the scored instrument table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentRow<'a> {
    #[serde(rename = "eodDate")]
    pub eod_date: NaiveDate,
    pub phase: &'a str,
    #[serde(rename = "secId")]
    pub sec_id: &'a str,
    pub num_calls: u64,
    pub cpu_time: f64,
    pub cross_anomaly: bool,
    pub roll_med_cpu: Option<f64>,
    pub roll_std_cpu: Option<f64>,
    pub zscore_cpu: Option<f64>,
    pub ts_anomaly: bool,
    pub slow_trade: bool,
    pub slow_score: u8,
}

impl<'a> From<&'a ScoredInstrument> for InstrumentRow<'a> {
    fn from(scored: &'a ScoredInstrument) -> Self {
        let row = &scored.row;
        Self {
            eod_date: row.record.date,
            phase: &row.record.phase,
            sec_id: &row.record.sec_id,
            num_calls: row.record.num_calls,
            cpu_time: row.record.cpu_time,
            cross_anomaly: row.cross_anomaly,
            roll_med_cpu: row.cpu_baseline.median,
            roll_std_cpu: row.cpu_baseline.std,
            zscore_cpu: row.cpu_baseline.zscore,
            ts_anomaly: row.ts_anomaly,
            slow_trade: row.slow_trade,
            slow_score: scored.slow_score,
        }
    }
}

/// Whole-run JSON document
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub config: &'a DetectorConfig,
    pub batches: Vec<BatchRow<'a>>,
    pub flagged_pairs: &'a [FlaggedPair],
    pub instruments: Vec<InstrumentRow<'a>>,
    pub summary: ScoreSummary,
}

impl<'a> JsonReport<'a> {
    pub fn new(report: &'a PipelineReport) -> Self {
        Self {
            config: &report.config,
            batches: report.batches.iter().map(BatchRow::from).collect(),
            flagged_pairs: &report.flagged,
            instruments: report.instruments.iter().map(InstrumentRow::from).collect(),
            summary: report.summary(),
        }
    }
}

/// Write the JSON document, pretty-printed
pub fn write_json<W: Write>(report: &PipelineReport, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, &JsonReport::new(report))?;
    writeln!(writer)?;
    Ok(())
}

/// Write one table as CSV with a header row
pub fn write_csv<W: Write>(report: &PipelineReport, table: CsvTable, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    match table {
        CsvTable::Batches => {
            for row in &report.batches {
                out.serialize(BatchRow::from(row))?;
            }
        }
        CsvTable::Instruments => {
            for row in &report.instruments {
                out.serialize(InstrumentRow::from(row))?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

/// Write the human-readable summary
pub fn write_text<W: Write>(report: &PipelineReport, mut w: W) -> Result<()> {
    writeln!(w, "=== Batch Anomalies ===")?;
    let anomalous: Vec<&AnnotatedBatch> = report.batch_anomalies().collect();
    if anomalous.is_empty() {
        writeln!(w, "  none")?;
    }
    for row in &anomalous {
        writeln!(
            w,
            "  {} {:<9} cpu {:>10.2}  z(cpu) {:>6}  z(cpu/secId) {:>6}  z(calls) {:>6}",
            row.flagged_pair(),
            day_name(row.day_of_week),
            row.record.cpu_time_seconds,
            fmt_opt(row.cpu_time_seconds_baseline.zscore),
            fmt_opt(row.cpu_per_sec_id_baseline.zscore),
            fmt_opt(row.total_grid_calls_baseline.zscore),
        )?;
        if let Some(median) = row.dow_cpu_median {
            writeln!(w, "      weekday median cpu {:.2}", median)?;
        }
    }
    writeln!(w)?;

    writeln!(w, "=== Flagged Pairs ===")?;
    if report.flagged.is_empty() {
        writeln!(w, "  none")?;
    }
    for pair in &report.flagged {
        let outcome = report
            .outcomes
            .iter()
            .find(|(flagged, _)| flagged == pair)
            .map(|(_, outcome)| outcome);
        match outcome {
            Some(PairOutcome::Scanned {
                instruments,
                slow_trades,
            }) => writeln!(
                w,
                "  {}  ({} instruments, {} slow trades)",
                pair, instruments, slow_trades
            )?,
            Some(PairOutcome::NoData) => writeln!(w, "  {}  (no instrument data)", pair)?,
            Some(PairOutcome::FetchFailed(reason)) => {
                writeln!(w, "  {}  (fetch failed: {})", pair, reason)?
            }
            None => writeln!(w, "  {}", pair)?,
        }
    }
    writeln!(w)?;

    if !report.outcomes.is_empty() {
        let mut slow: Vec<&ScoredInstrument> = report.slow_trades().collect();
        // stable: equal scores keep input order
        slow.sort_by(|a, b| b.slow_score.cmp(&a.slow_score));

        writeln!(w, "=== Slow Trades (by score) ===")?;
        if slow.is_empty() {
            writeln!(w, "  none")?;
        } else {
            writeln!(
                w,
                "  {:<10} {:<8} {:<12} {:>9} {:>10} {:>5}",
                "eodDate", "phase", "secId", "num_calls", "cpu_time", "score"
            )?;
        }
        for scored in &slow {
            let record = &scored.row.record;
            writeln!(
                w,
                "  {:<10} {:<8} {:<12} {:>9} {:>10.2} {:>5}",
                record.date.format(DATE_FORMAT),
                record.phase,
                record.sec_id,
                record.num_calls,
                record.cpu_time,
                scored.slow_score
            )?;
        }
        writeln!(w)?;
    }

    let summary = report.summary();
    writeln!(
        w,
        "Batches: {}  anomalous: {}  flagged pairs: {}",
        report.batches.len(),
        anomalous.len(),
        report.flagged.len()
    )?;
    writeln!(
        w,
        "Instruments scored: {}  slow trades: {}  max score: {}",
        summary.scored, summary.slow_trades, summary.max_score
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{InMemorySource, Pipeline};
    use crate::records::{BatchRecord, InstrumentRecord};

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, n).unwrap()
    }

    fn report() -> PipelineReport {
        let cpu = [200.0, 202.0, 198.0, 201.0, 199.0, 203.0, 197.0, 1000.0];
        let batches: Vec<_> = cpu
            .iter()
            .enumerate()
            .map(|(i, &c)| BatchRecord::new(day(i as u32 + 1), "A", 100, c, 50))
            .collect();
        let instruments = vec![
            InstrumentRecord::new(day(8), "A", "S001", 1, 50.0),
            InstrumentRecord::new(day(8), "A", "S002", 10, 10.0),
        ];
        Pipeline::new(DetectorConfig::default())
            .unwrap()
            .run(&batches, &InMemorySource::new(instruments))
            .unwrap()
    }

    #[test]
    fn test_json_column_names_and_nulls() {
        let mut buf = Vec::new();
        write_json(&report(), &mut buf).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        let first = &doc["batches"][0];
        assert_eq!(first["eodDate"], "2024-01-01");
        assert!(first["cpu_time_seconds_z"].is_null());
        assert_eq!(first["cpu_per_secId"], 4.0);
        assert_eq!(first["day_of_week"], "Monday");

        let last = &doc["batches"][7];
        assert_eq!(last["batch_anomaly"], true);
        assert!(last["total_grid_calls_z"].is_null());
        assert_eq!(last["total_grid_calls_roll_std"], 0.0);

        assert_eq!(doc["flagged_pairs"][0]["eodDate"], "2024-01-08");
        assert_eq!(doc["flagged_pairs"][0]["phase"], "A");

        let inst = &doc["instruments"][0];
        assert_eq!(inst["secId"], "S001");
        assert_eq!(inst["slow_score"], 45);
        assert!(inst["zscore_cpu"].is_null());
        assert_eq!(doc["config"]["rolling_window"], 7);
    }

    #[test]
    fn test_csv_instrument_table() {
        let mut buf = Vec::new();
        write_csv(&report(), CsvTable::Instruments, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "eodDate,phase,secId,num_calls,cpu_time,cross_anomaly,roll_med_cpu,\
             roll_std_cpu,zscore_cpu,ts_anomaly,slow_trade,slow_score"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2024-01-08,A,S001,1,50.0,true,,,,false,true,45"
        );
    }

    #[test]
    fn test_csv_batch_table_has_all_rows() {
        let mut buf = Vec::new();
        write_csv(&report(), CsvTable::Batches, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 9);
        assert!(text.starts_with("eodDate,phase,total_grid_calls,cpu_time_seconds,cnt,cpu_per_secId,"));
    }

    #[test]
    fn test_text_report_sections() {
        let mut buf = Vec::new();
        write_text(&report(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("=== Flagged Pairs ==="));
        assert!(text.contains("2024-01-08 | A  (2 instruments, 1 slow trades)"));
        assert!(text.contains("S001"));
        assert!(text.contains("max score: 45"));
    }

    #[test]
    fn test_text_report_shows_failed_fetch() {
        let mut report = report();
        report.outcomes[0].1 = PairOutcome::FetchFailed("I/O error: connection reset".to_string());
        let mut buf = Vec::new();
        write_text(&report, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("2024-01-08 | A  (fetch failed: I/O error: connection reset)"));
        assert!(text.contains("=== Batch Anomalies ==="));
        assert!(text.contains("2024-01-08 | A Monday"));
    }
}
