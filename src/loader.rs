//! Flat-file loaders for batch and instrument tables
//!
//! Every required field is looked up explicitly and type-checked; a missing
//! column or a malformed cell is a [`DetectError::Schema`] naming the
//! field, never a silently defaulted value. Dates are normalized here, so
//! detectors only ever see `NaiveDate`.

use crate::error::{DetectError, Result};
use crate::records::{parse_eod_date, BatchRecord, InstrumentRecord};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Primary date column
pub const DATE_FIELD: &str = "eodDate";

/// Accepted when [`DATE_FIELD`] is absent
pub const DATE_FALLBACK_FIELD: &str = "date";

/// One raw cell, before typing
enum Cell<'a> {
    Text(&'a str),
    Json(&'a Value),
}

/// Field lookup over one raw input row
trait RawRow {
    fn cell(&self, field: &str) -> Option<Cell<'_>>;
    fn has_column(&self, field: &str) -> bool;
}

struct CsvRow<'a> {
    headers: &'a StringRecord,
    record: &'a StringRecord,
}

impl RawRow for CsvRow<'_> {
    fn cell(&self, field: &str) -> Option<Cell<'_>> {
        let index = self.headers.iter().position(|h| h == field)?;
        self.record
            .get(index)
            .filter(|text| !text.is_empty())
            .map(Cell::Text)
    }

    fn has_column(&self, field: &str) -> bool {
        self.headers.iter().any(|h| h == field)
    }
}

impl RawRow for Map<String, Value> {
    fn cell(&self, field: &str) -> Option<Cell<'_>> {
        self.get(field)
            .filter(|value| !value.is_null())
            .map(Cell::Json)
    }

    fn has_column(&self, field: &str) -> bool {
        self.contains_key(field)
    }
}

/// Typed accessors with the row number carried into every error
struct Fields<'a, R: RawRow> {
    row: &'a R,
    line: usize,
}

impl<'a, R: RawRow> Fields<'a, R> {
    fn fail(&self, field: &str, reason: impl std::fmt::Display) -> DetectError {
        DetectError::schema(field, format!("row {}: {}", self.line, reason))
    }

    fn require(&self, field: &str) -> Result<Cell<'a>> {
        self.row
            .cell(field)
            .ok_or_else(|| self.fail(field, "missing value"))
    }

    fn text(&self, field: &str) -> Result<String> {
        match self.require(field)? {
            Cell::Text(text) => Ok(text.to_string()),
            Cell::Json(Value::String(text)) => Ok(text.clone()),
            Cell::Json(other) => Err(self.fail(field, format!("expected string, got {}", other))),
        }
    }

    fn float(&self, field: &str) -> Result<f64> {
        let value = match self.require(field)? {
            Cell::Text(text) => text
                .parse::<f64>()
                .map_err(|_| self.fail(field, format!("expected number, got '{}'", text)))?,
            Cell::Json(Value::Number(number)) => number
                .as_f64()
                .ok_or_else(|| self.fail(field, "number out of range"))?,
            Cell::Json(other) => {
                return Err(self.fail(field, format!("expected number, got {}", other)))
            }
        };
        if !value.is_finite() || value < 0.0 {
            return Err(self.fail(field, format!("expected finite value >= 0, got {}", value)));
        }
        Ok(value)
    }

    /// Non-negative integer; integral floats such as `12.0` are accepted
    fn count(&self, field: &str) -> Result<u64> {
        match self.require(field)? {
            Cell::Text(text) => match text.parse::<u64>() {
                Ok(count) => Ok(count),
                Err(_) => text
                    .parse::<f64>()
                    .ok()
                    .and_then(integral)
                    .ok_or_else(|| {
                        self.fail(field, format!("expected non-negative integer, got '{}'", text))
                    }),
            },
            Cell::Json(Value::Number(number)) => number
                .as_u64()
                .or_else(|| number.as_f64().and_then(integral))
                .ok_or_else(|| {
                    self.fail(field, format!("expected non-negative integer, got {}", number))
                }),
            Cell::Json(other) => Err(self.fail(
                field,
                format!("expected non-negative integer, got {}", other),
            )),
        }
    }

    fn date(&self) -> Result<NaiveDate> {
        let field = if self.row.has_column(DATE_FIELD) {
            DATE_FIELD
        } else if self.row.has_column(DATE_FALLBACK_FIELD) {
            DATE_FALLBACK_FIELD
        } else {
            return Err(self.fail(
                DATE_FIELD,
                format!("neither '{}' nor '{}' present", DATE_FIELD, DATE_FALLBACK_FIELD),
            ));
        };
        let raw = self.text(field)?;
        parse_eod_date(&raw).map_err(|_| self.fail(field, format!("unparseable date '{}'", raw)))
    }
}

fn integral(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64)
        .then_some(value as u64)
}

fn batch_from_row<R: RawRow>(row: &R, line: usize) -> Result<BatchRecord> {
    let fields = Fields { row, line };
    Ok(BatchRecord {
        date: fields.date()?,
        phase: fields.text("phase")?,
        total_grid_calls: fields.count("total_grid_calls")?,
        cpu_time_seconds: fields.float("cpu_time_seconds")?,
        cnt: fields.count("cnt")?,
    })
}

fn instrument_from_row<R: RawRow>(row: &R, line: usize) -> Result<InstrumentRecord> {
    let fields = Fields { row, line };
    let record = InstrumentRecord {
        date: fields.date()?,
        phase: fields.text("phase")?,
        sec_id: fields.text("secId")?,
        num_calls: fields.count("num_calls")?,
        cpu_time: fields.float("cpu_time")?,
    };
    if record.num_calls == 0 {
        return Err(fields.fail("num_calls", "expected >= 1, got 0"));
    }
    Ok(record)
}

fn read_csv<T, R: Read>(
    reader: R,
    build: impl Fn(&CsvRow<'_>, usize) -> Result<T>,
) -> Result<Vec<T>> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut out = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        out.push(build(
            &CsvRow {
                headers: &headers,
                record: &record,
            },
            index + 1,
        )?);
    }
    Ok(out)
}

fn parse_json<T>(
    text: &str,
    build: impl Fn(&Map<String, Value>, usize) -> Result<T>,
) -> Result<Vec<T>> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(rows) = value else {
        return Err(DetectError::schema("<root>", "expected a JSON array of row objects"));
    };

    rows.iter()
        .enumerate()
        .map(|(index, row)| match row {
            Value::Object(map) => build(map, index + 1),
            other => Err(DetectError::schema(
                "<row>",
                format!("row {}: expected object, got {}", index + 1, other),
            )),
        })
        .collect()
}

/// Read a batch table from CSV
pub fn read_batch_csv<R: Read>(reader: R) -> Result<Vec<BatchRecord>> {
    read_csv(reader, |row, line| batch_from_row(row, line))
}

/// Read an instrument table from CSV
pub fn read_instrument_csv<R: Read>(reader: R) -> Result<Vec<InstrumentRecord>> {
    read_csv(reader, |row, line| instrument_from_row(row, line))
}

/// Parse a batch table from a JSON array of objects
pub fn parse_batch_json(text: &str) -> Result<Vec<BatchRecord>> {
    parse_json(text, batch_from_row)
}

/// Parse an instrument table from a JSON array of objects
pub fn parse_instrument_json(text: &str) -> Result<Vec<InstrumentRecord>> {
    parse_json(text, instrument_from_row)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Load a batch table from a CSV file
pub fn load_batch_csv(path: impl AsRef<Path>) -> Result<Vec<BatchRecord>> {
    read_batch_csv(File::open(path)?)
}

/// Load an instrument table from a CSV file
pub fn load_instrument_csv(path: impl AsRef<Path>) -> Result<Vec<InstrumentRecord>> {
    read_instrument_csv(File::open(path)?)
}

/// Load a batch table from a JSON file
pub fn load_batch_json(path: impl AsRef<Path>) -> Result<Vec<BatchRecord>> {
    parse_batch_json(&fs::read_to_string(path)?)
}

/// Load an instrument table from a JSON file
pub fn load_instrument_json(path: impl AsRef<Path>) -> Result<Vec<InstrumentRecord>> {
    parse_instrument_json(&fs::read_to_string(path)?)
}

/// Load a batch table, choosing JSON or CSV by file extension
pub fn load_batch_file(path: impl AsRef<Path>) -> Result<Vec<BatchRecord>> {
    let path = path.as_ref();
    let records = if is_json(path) {
        load_batch_json(path)?
    } else {
        load_batch_csv(path)?
    };
    tracing::info!("loaded {} batch rows from {}", records.len(), path.display());
    Ok(records)
}

/// Load an instrument table, choosing JSON or CSV by file extension
pub fn load_instrument_file(path: impl AsRef<Path>) -> Result<Vec<InstrumentRecord>> {
    let path = path.as_ref();
    let records = if is_json(path) {
        load_instrument_json(path)?
    } else {
        load_instrument_csv(path)?
    };
    tracing::info!(
        "loaded {} instrument rows from {}",
        records.len(),
        path.display()
    );
    Ok(records)
}
