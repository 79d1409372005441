//! Trailing rolling baselines, z-scores and percentiles
//!
//! Every statistic here is explicitly three-valued: a z-score is either a
//! defined number or `None`. [`AnomalySignal`] turns that into the single
//! collapsing rule used by both detectors: undefined is never anomalous.

use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics, Statistics};

/// Rolling median / standard deviation / z-score for one row
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RollingBaseline {
    pub median: Option<f64>,
    pub std: Option<f64>,
    pub zscore: Option<f64>,
}

/// Outcome of comparing a z-score against the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnomalySignal {
    /// Defined z-score strictly above the threshold
    Anomalous,
    /// Defined z-score at or below the threshold
    Normal,
    /// Insufficient history, zero variance or missing value
    Undefined,
}

impl AnomalySignal {
    pub fn from_zscore(zscore: Option<f64>, threshold: f64) -> Self {
        match zscore {
            Some(z) if z > threshold => Self::Anomalous,
            Some(_) => Self::Normal,
            None => Self::Undefined,
        }
    }

    /// Undefined resolves to `false`, never to `true`
    pub fn is_anomalous(self) -> bool {
        matches!(self, Self::Anomalous)
    }
}

/// Compute trailing baselines over a date-sorted series
///
/// Row `i` sees positions `i + 1 - window ..= i`. Only defined values count
/// towards `min_history`; the standard deviation is the sample (n - 1)
/// deviation and needs at least two defined values.
pub fn rolling_baselines(
    values: &[Option<f64>],
    window: usize,
    min_history: usize,
) -> Vec<RollingBaseline> {
    let window = window.max(1);

    values
        .iter()
        .enumerate()
        .map(|(i, current)| {
            let start = (i + 1).saturating_sub(window);
            let in_window: Vec<f64> = values[start..=i]
                .iter()
                .flatten()
                .copied()
                .filter(|v| v.is_finite())
                .collect();

            if in_window.is_empty() || in_window.len() < min_history {
                return RollingBaseline::default();
            }

            let std = if in_window.len() >= 2 {
                Some(in_window.iter().std_dev()).filter(|s| s.is_finite())
            } else {
                None
            };
            let median = Some(Data::new(in_window).median()).filter(|m| m.is_finite());

            RollingBaseline {
                median,
                std,
                zscore: zscore(*current, median, std),
            }
        })
        .collect()
}

/// `(value - median) / std`, defined only when every input is and std > 0
pub fn zscore(value: Option<f64>, median: Option<f64>, std: Option<f64>) -> Option<f64> {
    let (value, median, std) = (value?, median?, std?);
    if std <= 0.0 || !value.is_finite() {
        return None;
    }
    let z = (value - median) / std;
    z.is_finite().then_some(z)
}

/// Percentile of ascending-sorted data with linear interpolation
///
/// `q` is a fraction in [0, 1]. Equal neighbours interpolate to themselves
/// exactly, so an all-equal sample has every percentile equal to its value.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    match sorted {
        [] => None,
        [only] => Some(*only),
        _ => {
            let q = q.clamp(0.0, 1.0);
            let index = q * (sorted.len() - 1) as f64;
            let lower = index.floor() as usize;
            let upper = index.ceil() as usize;
            if lower == upper {
                Some(sorted[lower])
            } else {
                let weight = index - lower as f64;
                Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
            }
        }
    }
}

/// Sort a sample ascending and take its percentile
pub fn percentile_of(values: impl IntoIterator<Item = f64>, q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    percentile(&sorted, q)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defined(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_min_history_floor() {
        let out = rolling_baselines(&defined(&[1.0, 2.0, 3.0, 4.0]), 7, 3);
        assert_eq!(out[0], RollingBaseline::default());
        assert_eq!(out[1], RollingBaseline::default());
        assert_eq!(out[2].median, Some(2.0));
        assert_eq!(out[3].median, Some(2.5));
    }

    #[test]
    fn test_sample_standard_deviation() {
        let out = rolling_baselines(&defined(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 8, 2);
        // sample variance of the eight values is 32/7
        let expected = (32.0_f64 / 7.0).sqrt();
        let std = out[7].std.unwrap();
        assert!((std - expected).abs() < 1e-12, "got {}", std);
    }

    #[test]
    fn test_window_drops_old_rows() {
        let out = rolling_baselines(&defined(&[100.0, 1.0, 1.0, 1.0]), 3, 3);
        assert_eq!(out[2].median, Some(1.0));
        // window of three ending at row 3 no longer sees the 100
        assert_eq!(out[3].median, Some(1.0));
        assert_eq!(out[3].std, Some(0.0));
        assert_eq!(out[3].zscore, None);
    }

    #[test]
    fn test_missing_values_do_not_count_towards_history() {
        let values = vec![Some(1.0), None, Some(2.0), None, Some(3.0)];
        let out = rolling_baselines(&values, 7, 3);
        assert_eq!(out[3].median, None);
        assert_eq!(out[4].median, Some(2.0));
    }

    #[test]
    fn test_missing_current_value_has_baseline_but_no_zscore() {
        let values = vec![Some(1.0), Some(2.0), Some(3.0), None];
        let out = rolling_baselines(&values, 7, 3);
        assert_eq!(out[3].median, Some(2.0));
        assert!(out[3].std.is_some());
        assert_eq!(out[3].zscore, None);
    }

    #[test]
    fn test_single_value_history_has_no_std() {
        let out = rolling_baselines(&defined(&[5.0]), 7, 1);
        assert_eq!(out[0].median, Some(5.0));
        assert_eq!(out[0].std, None);
        assert_eq!(out[0].zscore, None);
    }

    #[test]
    fn test_zscore_guards() {
        assert_eq!(zscore(Some(3.0), Some(1.0), Some(2.0)), Some(1.0));
        assert_eq!(zscore(Some(3.0), Some(1.0), Some(0.0)), None);
        assert_eq!(zscore(None, Some(1.0), Some(2.0)), None);
        assert_eq!(zscore(Some(3.0), None, Some(2.0)), None);
        assert_eq!(zscore(Some(3.0), Some(1.0), None), None);
    }

    #[test]
    fn test_signal_collapsing_rule() {
        assert!(AnomalySignal::from_zscore(Some(2.5), 2.0).is_anomalous());
        assert!(!AnomalySignal::from_zscore(Some(2.0), 2.0).is_anomalous());
        assert_eq!(
            AnomalySignal::from_zscore(None, 2.0),
            AnomalySignal::Undefined
        );
        assert!(!AnomalySignal::Undefined.is_anomalous());
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.5), Some(2.5));
        assert_eq!(percentile(&sorted, 0.25), Some(1.75));
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 1.0), Some(4.0));
        let p90 = percentile(&sorted, 0.9).unwrap();
        assert!((p90 - 3.7).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_edges() {
        assert_eq!(percentile(&[], 0.5), None);
        assert_eq!(percentile(&[7.0], 0.9), Some(7.0));
    }

    #[test]
    fn test_percentile_all_equal_is_exact() {
        let p = percentile_of(vec![10.3; 9], 0.9).unwrap();
        assert_eq!(p, 10.3);
    }

    #[test]
    fn test_percentile_of_sorts_input() {
        assert_eq!(percentile_of(vec![4.0, 1.0, 3.0, 2.0], 0.5), Some(2.5));
    }
}
