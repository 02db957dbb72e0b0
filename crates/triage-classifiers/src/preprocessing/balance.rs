//! SMOTE-style minority oversampling for training matrices.
//!
//! Only ever called while fitting a recipe; validation and test partitions
//! are never resampled.
use ndarray::{Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OversamplingOptions {
    /// Minority neighbours considered when interpolating.
    pub neighbors: usize,
    /// Target minority size as a fraction of the majority size.
    pub over_ratio: f64,
}

impl Default for OversamplingOptions {
    fn default() -> Self {
        Self {
            neighbors: 5,
            over_ratio: 1.0,
        }
    }
}

/// Append synthetic minority rows interpolated between minority neighbours.
///
/// Returns the augmented matrix, its labels, and the number of rows added.
pub fn oversample<R: Rng>(
    x: &Array2<f64>,
    y: &[bool],
    options: &OversamplingOptions,
    rng: &mut R,
) -> Result<(Array2<f64>, Vec<bool>, usize), ModelError> {
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            expected: x.nrows(),
            got: y.len(),
        });
    }
    let positives: Vec<usize> = (0..y.len()).filter(|&i| y[i]).collect();
    let negatives: Vec<usize> = (0..y.len()).filter(|&i| !y[i]).collect();
    let (minority, majority, minority_label) = if positives.len() <= negatives.len() {
        (positives, negatives, true)
    } else {
        (negatives, positives, false)
    };

    let target = (majority.len() as f64 * options.over_ratio).floor() as usize;
    if minority.len() < 2 || target <= minority.len() {
        if minority.len() < 2 {
            log::warn!(
                "Skipping oversampling: only {} minority rows in training matrix",
                minority.len()
            );
        }
        return Ok((x.clone(), y.to_vec(), 0));
    }
    let n_new = target - minority.len();
    let k = options.neighbors.max(1).min(minority.len() - 1);

    let neighbours: Vec<Vec<usize>> = minority
        .iter()
        .map(|&i| {
            let mut d: Vec<(f64, usize)> = minority
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| {
                    let dist = x
                        .row(i)
                        .iter()
                        .zip(x.row(j).iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>();
                    (dist, j)
                })
                .collect();
            d.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            d.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect();

    let mut synthetic = Array2::<f64>::zeros((n_new, x.ncols()));
    for s in 0..n_new {
        let m = rng.gen_range(0..minority.len());
        let base = x.row(minority[m]);
        let neighbour = x.row(neighbours[m][rng.gen_range(0..k)]);
        let gap: f64 = rng.gen();
        for (c, out) in synthetic.row_mut(s).iter_mut().enumerate() {
            *out = base[c] + gap * (neighbour[c] - base[c]);
        }
    }

    let mut augmented = x.clone();
    augmented
        .append(Axis(0), synthetic.view())
        .map_err(|_| ModelError::ShapeMismatch {
            expected: x.ncols(),
            got: synthetic.ncols(),
        })?;
    let mut labels = y.to_vec();
    labels.extend(std::iter::repeat(minority_label).take(n_new));
    Ok((augmented, labels, n_new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn balances_classes_within_minority_hull() {
        let x = Array2::from_shape_fn((12, 2), |(r, c)| (r * 2 + c) as f64);
        let y: Vec<bool> = (0..12).map(|i| i < 3).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let (xa, ya, added) =
            oversample(&x, &y, &OversamplingOptions::default(), &mut rng).unwrap();
        assert_eq!(added, 6);
        assert_eq!(ya.iter().filter(|&&v| v).count(), 9);
        assert_eq!(xa.nrows(), 18);
        for r in 12..18 {
            assert!(xa[(r, 0)] >= 0.0 && xa[(r, 0)] <= 4.0);
        }
        // original rows untouched
        assert_eq!(xa.slice(ndarray::s![..12, ..]), x);
    }

    #[test]
    fn mismatched_labels_are_an_error() {
        let x = Array2::from_shape_fn((6, 2), |(r, c)| (r + c) as f64);
        let y = vec![true, false, false];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = oversample(&x, &y, &OversamplingOptions::default(), &mut rng).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { expected: 6, got: 3 }));
    }
}
