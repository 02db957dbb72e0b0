//! Unsupervised column filters fitted on a training partition.
//!
//! Both filters break ties by column position so a given training partition
//! always yields the same removal set.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Pearson correlation between every pair of columns.
///
/// Columns with zero variance correlate 0 with everything (and 1 with
/// themselves).
pub fn correlation_matrix(columns: &[&[f64]]) -> Array2<f64> {
    let p = columns.len();
    let centered: Vec<(Vec<f64>, f64)> = columns
        .iter()
        .map(|col| {
            let n = col.len().max(1) as f64;
            let mean = col.iter().sum::<f64>() / n;
            let c: Vec<f64> = col.iter().map(|v| v - mean).collect();
            let norm = c.iter().map(|v| v * v).sum::<f64>().sqrt();
            (c, norm)
        })
        .collect();

    let mut r = Array2::<f64>::eye(p);
    for i in 0..p {
        for j in (i + 1)..p {
            let (ci, ni) = &centered[i];
            let (cj, nj) = &centered[j];
            let denom = ni * nj;
            let value = if denom > 0.0 {
                ci.iter().zip(cj.iter()).map(|(a, b)| a * b).sum::<f64>() / denom
            } else {
                0.0
            };
            let value = if value.is_finite() { value } else { 0.0 };
            r[(i, j)] = value;
            r[(j, i)] = value;
        }
    }
    r
}

/// Positions of columns to drop so no remaining pair exceeds `threshold`
/// in absolute correlation.
///
/// Repeatedly takes the most correlated remaining pair (earliest pair on
/// ties) and drops the member with the larger mean absolute correlation to
/// the other remaining columns; on equal means the later column goes.
pub fn correlation_filter(columns: &[&[f64]], threshold: f64) -> Vec<usize> {
    let r = correlation_matrix(columns);
    let p = columns.len();
    let mut alive = vec![true; p];
    let mut removed = Vec::new();

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..p {
            if !alive[i] {
                continue;
            }
            for j in (i + 1)..p {
                if !alive[j] {
                    continue;
                }
                let v = r[(i, j)].abs();
                if v > threshold && best.map_or(true, |(_, _, b)| v > b) {
                    best = Some((i, j, v));
                }
            }
        }
        let Some((i, j, _)) = best else { break };

        let mean_abs = |k: usize| {
            let others: Vec<f64> = (0..p)
                .filter(|&m| m != k && alive[m])
                .map(|m| r[(k, m)].abs())
                .collect();
            others.iter().sum::<f64>() / others.len().max(1) as f64
        };
        let drop = if mean_abs(i) > mean_abs(j) { i } else { j };
        alive[drop] = false;
        removed.push(drop);
    }

    removed.sort_unstable();
    removed
}

/// Cut-offs of the near-zero-variance filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearZeroVariance {
    /// Ratio of most common to second most common value above which a column is suspect.
    pub freq_cut: f64,
    /// Percentage of distinct values below which a suspect column is dropped.
    pub unique_cut: f64,
}

impl Default for NearZeroVariance {
    fn default() -> Self {
        Self {
            freq_cut: 95.0 / 5.0,
            unique_cut: 10.0,
        }
    }
}

impl NearZeroVariance {
    /// Positions of columns that are constant, or both dominated by one value
    /// and nearly without distinct values.
    pub fn filter(&self, columns: &[&[f64]]) -> Vec<usize> {
        columns
            .iter()
            .enumerate()
            .filter(|(_, col)| self.is_near_zero_variance(col))
            .map(|(i, _)| i)
            .collect()
    }

    fn is_near_zero_variance(&self, col: &[f64]) -> bool {
        if col.is_empty() {
            return true;
        }
        let mut sorted = col.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mut counts: Vec<usize> = Vec::new();
        let mut prev: Option<f64> = None;
        for v in sorted {
            if prev == Some(v) {
                if let Some(last) = counts.last_mut() {
                    *last += 1;
                }
            } else {
                counts.push(1);
                prev = Some(v);
            }
        }
        if counts.len() < 2 {
            return true;
        }
        counts.sort_unstable_by(|a, b| b.cmp(a));
        let freq_ratio = counts[0] as f64 / counts[1] as f64;
        let percent_unique = 100.0 * counts.len() as f64 / col.len() as f64;
        freq_ratio > self.freq_cut && percent_unique < self.unique_cut
    }
}
