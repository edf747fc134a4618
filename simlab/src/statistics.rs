//! Descriptive statistics over a metric's per-dialogue scores.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    pub values: Vec<f64>,
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

impl MetricStatistics {
    /// Summarizes `values`. Returns `None` for an empty slice.
    pub fn from_values(values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            mean: mean(&values),
            std: sample_std(&values),
            median: quantile(&sorted, 0.5),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            q1: quantile(&sorted, 0.25),
            q3: quantile(&sorted, 0.75),
            values,
        })
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0.0 below two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Quantile of an ascending slice, interpolating linearly between the two
/// closest ranks.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let fraction = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_ones() {
        let stats = MetricStatistics::from_values(vec![1.0; 12]).unwrap();
        assert_eq!(stats.mean, 1.0);
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.median, 1.0);
        assert_eq!((stats.min, stats.max), (1.0, 1.0));
        assert_eq!((stats.q1, stats.q3), (1.0, 1.0));
        assert_eq!(stats.values.len(), 12);
    }

    #[test]
    fn test_interpolated_quartiles() {
        let stats = MetricStatistics::from_values(vec![4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.q1, 1.75);
        assert_eq!(stats.q3, 3.25);
        assert!((stats.std - 1.290_994_448_735_805_6).abs() < 1e-12);
        // Input order is preserved.
        assert_eq!(stats.values, vec![4.0, 1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_single_value_and_empty() {
        let stats = MetricStatistics::from_values(vec![0.5]).unwrap();
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.q1, 0.5);
        assert!(MetricStatistics::from_values(Vec::new()).is_none());
    }

    proptest! {
        #[test]
        fn quartiles_are_ordered(values in prop::collection::vec(0.0f64..1.0, 1..50)) {
            let stats = MetricStatistics::from_values(values).unwrap();
            let eps = 1e-12;
            prop_assert!(stats.min <= stats.q1 + eps);
            prop_assert!(stats.q1 <= stats.median + eps);
            prop_assert!(stats.median <= stats.q3 + eps);
            prop_assert!(stats.q3 <= stats.max + eps);
        }
    }
}
