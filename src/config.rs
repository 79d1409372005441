//! Detector profile: the four tunables shared by both detection stages.
//!
//! A profile is fixed for the duration of a run. Loaded from TOML when the
//! caller has one, otherwise the defaults below apply.

use crate::error::{DetectError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for batch and instrument anomaly detection
///
/// # Example
/// ```
/// use slow_trade_detector::config::DetectorConfig;
///
/// let config = DetectorConfig::default();
/// assert_eq!(config.rolling_window, 7);
/// assert_eq!(config.zscore_threshold, 2.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Trailing window length in observations (one observation per day)
    ///
    /// The window includes the current row.
    pub rolling_window: usize,

    /// Minimum defined observations in-window before batch statistics exist
    pub min_batch_history: usize,

    /// Minimum defined observations in-window before an instrument's
    /// time-series statistics exist
    pub min_instrument_history: usize,

    /// A z-score strictly above this value is anomalous
    pub zscore_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            rolling_window: 7,
            min_batch_history: 3,
            min_instrument_history: 3,
            zscore_threshold: 2.0,
        }
    }
}

impl DetectorConfig {
    /// Parse a profile from TOML text; absent keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a profile from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rolling_window == 0 {
            return Err(DetectError::InvalidConfig(
                "rolling_window must be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("min_batch_history", self.min_batch_history),
            ("min_instrument_history", self.min_instrument_history),
        ] {
            if value == 0 || value > self.rolling_window {
                return Err(DetectError::InvalidConfig(format!(
                    "{} must be in [1, rolling_window={}], got {}",
                    name, self.rolling_window, value
                )));
            }
        }

        if !self.zscore_threshold.is_finite() {
            return Err(DetectError::InvalidConfig(format!(
                "zscore_threshold must be finite, got {}",
                self.zscore_threshold
            )));
        }

        Ok(())
    }
}
