//! Stratified percentile bootstrap.
//!
//! Iteration `b` always draws from `task_rng(seed, Bootstrap, b)`, and the
//! replicates are collected in iteration order, so intervals are identical
//! for any rayon pool size.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::partition::stratified_resample;
use crate::rng::{task_rng, Stream};

/// Point estimate with a percentile interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Iterations where the statistic was undefined.
    pub failed_iterations: usize,
}

impl Estimate {
    pub fn point(value: Option<f64>) -> Self {
        Estimate {
            value,
            lower: None,
            upper: None,
            failed_iterations: 0,
        }
    }
}

/// Linear-interpolation quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let h = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Evaluate `statistic` on `iterations` stratified resamples of `labels`.
///
/// The statistic receives resampled positions and returns one value per
/// metric, `None` where a metric is undefined on that resample. Output is
/// indexed `[iteration][metric]`.
pub fn replicates<F>(labels: &[bool], iterations: usize, seed: u64, statistic: F) -> Vec<Vec<Option<f64>>>
where
    F: Fn(&[usize]) -> Vec<Option<f64>> + Sync,
{
    (0..iterations)
        .into_par_iter()
        .map(|b| {
            let mut rng = task_rng(seed, Stream::Bootstrap, b as u64);
            let positions = stratified_resample(labels, &mut rng);
            statistic(&positions)
        })
        .collect()
}

/// Percentile interval of metric `metric` across `replicates`.
pub fn percentile_interval(
    point: Option<f64>,
    replicates: &[Vec<Option<f64>>],
    metric: usize,
    confidence_level: f64,
) -> Estimate {
    let mut values: Vec<f64> = replicates
        .iter()
        .filter_map(|r| r.get(metric).copied().flatten())
        .filter(|v| v.is_finite())
        .collect();
    let failed_iterations = replicates.len() - values.len();
    values.sort_by(|a, b| a.total_cmp(b));
    let tail = (1.0 - confidence_level) / 2.0;
    Estimate {
        value: point,
        lower: quantile(&values, tail),
        upper: quantile(&values, 1.0 - tail),
        failed_iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 0.5), Some(3.0));
        assert_eq!(quantile(&v, 0.125), Some(1.5));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn undefined_replicates_are_counted() {
        let reps = vec![vec![Some(1.0)], vec![None], vec![Some(3.0)]];
        let e = percentile_interval(Some(2.0), &reps, 0, 0.95);
        assert_eq!(e.failed_iterations, 1);
        assert_eq!(e.value, Some(2.0));
        assert!(e.lower.unwrap() >= 1.0 && e.upper.unwrap() <= 3.0);
    }

    #[test]
    fn replicates_respect_class_sizes() {
        let labels = [true, false, false, true, false, false];
        let reps = replicates(&labels, 20, 5, |pos| {
            let positives = pos.iter().filter(|&&i| labels[i]).count();
            vec![Some(positives as f64)]
        });
        assert_eq!(reps.len(), 20);
        assert!(reps.iter().all(|r| r[0] == Some(2.0)));
    }
}
