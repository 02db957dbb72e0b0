//! DeLong test for two correlated ROC curves on the same patients.
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeLongTest {
    pub auc_a: f64,
    pub auc_b: f64,
    /// `auc_a - auc_b`.
    pub difference: f64,
    pub z: f64,
    /// Two-sided.
    pub p_value: f64,
}

fn heaviside(x: f64, y: f64) -> f64 {
    if x > y {
        1.0
    } else if x == y {
        0.5
    } else {
        0.0
    }
}

/// Placement values of one score vector: `(v10 over positives, v01 over negatives)`.
fn placements(scores: &[f64], positives: &[usize], negatives: &[usize]) -> (Vec<f64>, Vec<f64>) {
    let n = negatives.len() as f64;
    let m = positives.len() as f64;
    let v10 = positives
        .iter()
        .map(|&i| negatives.iter().map(|&j| heaviside(scores[i], scores[j])).sum::<f64>() / n)
        .collect();
    let v01 = negatives
        .iter()
        .map(|&j| positives.iter().map(|&i| heaviside(scores[i], scores[j])).sum::<f64>() / m)
        .collect();
    (v10, v01)
}

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

fn covariance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (a.len() - 1) as f64
}

/// Compare the AUCs of `scores_a` and `scores_b` on shared `labels`.
///
/// Swapping the two score vectors negates `z` and leaves the p-value
/// unchanged. When the difference has zero variance the test reports
/// `z = 0` and `p = 1` for equal AUCs.
pub fn delong_test(
    scores_a: &[f64],
    scores_b: &[f64],
    labels: &[bool],
) -> Result<DeLongTest, ModelError> {
    if scores_a.len() != labels.len() || scores_b.len() != labels.len() {
        return Err(ModelError::ShapeMismatch {
            expected: labels.len(),
            got: scores_a.len().min(scores_b.len()),
        });
    }
    let positives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i]).collect();
    let negatives: Vec<usize> = (0..labels.len()).filter(|&i| !labels[i]).collect();
    for (class, members) in [(true, &positives), (false, &negatives)] {
        if members.len() < 2 {
            return Err(ModelError::InsufficientSamples {
                class,
                count: members.len(),
                required: 2,
            });
        }
    }

    let (v10_a, v01_a) = placements(scores_a, &positives, &negatives);
    let (v10_b, v01_b) = placements(scores_b, &positives, &negatives);
    let auc_a = mean(&v10_a);
    let auc_b = mean(&v10_b);

    let m = positives.len() as f64;
    let n = negatives.len() as f64;
    let s10 = covariance(&v10_a, &v10_a) + covariance(&v10_b, &v10_b)
        - 2.0 * covariance(&v10_a, &v10_b);
    let s01 = covariance(&v01_a, &v01_a) + covariance(&v01_b, &v01_b)
        - 2.0 * covariance(&v01_a, &v01_b);
    let variance = s10 / m + s01 / n;
    let difference = auc_a - auc_b;

    let z = if variance > 1e-15 {
        difference / variance.sqrt()
    } else if difference == 0.0 {
        0.0
    } else {
        difference.signum() * f64::INFINITY
    };
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| ModelError::non_convergence("delong", e.to_string()))?;
    let p_value = if z.is_infinite() {
        0.0
    } else {
        (2.0 * (1.0 - normal.cdf(z.abs()))).clamp(0.0, 1.0)
    };

    Ok(DeLongTest {
        auc_a,
        auc_b,
        difference,
        z,
        p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<f64>, Vec<f64>, Vec<bool>) {
        let labels = vec![true, false, true, false, false, true, false, true, false, false];
        let a = vec![0.9, 0.2, 0.7, 0.4, 0.1, 0.8, 0.3, 0.35, 0.5, 0.25];
        let b = vec![0.6, 0.5, 0.4, 0.45, 0.3, 0.7, 0.65, 0.2, 0.1, 0.55];
        (a, b, labels)
    }

    #[test]
    fn swapping_models_negates_z() {
        let (a, b, labels) = sample();
        let ab = delong_test(&a, &b, &labels).unwrap();
        let ba = delong_test(&b, &a, &labels).unwrap();
        assert_eq!(ab.z, -ba.z);
        assert_eq!(ab.p_value, ba.p_value);
        assert!(ab.auc_a > ab.auc_b);
    }

    #[test]
    fn identical_models_are_indistinguishable() {
        let (a, _, labels) = sample();
        let t = delong_test(&a, &a, &labels).unwrap();
        assert_eq!(t.z, 0.0);
        assert_eq!(t.p_value, 1.0);
    }

    #[test]
    fn needs_two_of_each_class() {
        assert!(delong_test(&[0.1, 0.9, 0.3], &[0.2, 0.8, 0.4], &[false, true, false]).is_err());
    }
}
