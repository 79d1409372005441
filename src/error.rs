//! Error taxonomy for the detection pipeline
//!
//! Only genuine faults live here. Empty input and undefined statistics are
//! ordinary values (empty tables, `None` z-scores), not errors.

use thiserror::Error;

/// Errors raised by loaders, configuration and schema validation
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Schema error on field '{field}': {reason}")]
    Schema { field: String, reason: String },

    #[error("Unparseable date '{value}'")]
    Date { value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DetectError {
    /// Shorthand for a schema violation on `field`
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Name of the offending field, when the error is schema-related
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Schema { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
