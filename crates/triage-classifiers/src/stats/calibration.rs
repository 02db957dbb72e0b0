use serde::{Deserialize, Serialize};

use crate::error::ModelError;

const MAX_ITERATIONS: usize = 50;
const TOLERANCE: f64 = 1e-10;
const MAX_COEFFICIENT: f64 = 1e6;

/// Logistic recalibration of predicted probabilities.
///
/// Fits `logit P(y) = intercept + slope * logit(p)`; a perfectly calibrated
/// model has intercept 0 and slope 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub intercept: f64,
    pub slope: f64,
    /// Probabilities clamped into `[clip, 1 - clip]` before the logit.
    pub clipped: usize,
}

/// Logit after clamping into `[clip, 1 - clip]`. Returns whether `p` was clamped.
pub fn clipped_logit(p: f64, clip: f64) -> (f64, bool) {
    let q = p.clamp(clip, 1.0 - clip);
    ((q / (1.0 - q)).ln(), q != p)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Fit calibration intercept and slope by Newton-Raphson.
///
/// Fails with `NonConvergence` on separation, a singular information matrix
/// or when the iteration budget runs out.
pub fn calibration(scores: &[f64], labels: &[bool], clip: f64) -> Result<Calibration, ModelError> {
    if scores.len() != labels.len() {
        return Err(ModelError::ShapeMismatch {
            expected: labels.len(),
            got: scores.len(),
        });
    }
    let mut clipped = 0;
    let z: Vec<f64> = scores
        .iter()
        .map(|&p| {
            let (v, was_clipped) = clipped_logit(p, clip);
            clipped += was_clipped as usize;
            v
        })
        .collect();
    let y: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();

    let (mut a, mut b) = (0.0f64, 1.0f64);
    for _ in 0..MAX_ITERATIONS {
        // Gradient and information matrix of the log-likelihood.
        let (mut g0, mut g1) = (0.0, 0.0);
        let (mut h00, mut h01, mut h11) = (0.0, 0.0, 0.0);
        for (&zi, &yi) in z.iter().zip(&y) {
            let mu = sigmoid(a + b * zi);
            let w = mu * (1.0 - mu);
            let r = yi - mu;
            g0 += r;
            g1 += r * zi;
            h00 += w;
            h01 += w * zi;
            h11 += w * zi * zi;
        }
        let det = h00 * h11 - h01 * h01;
        if !det.is_finite() || det.abs() < 1e-12 {
            return Err(ModelError::non_convergence(
                "calibration",
                "singular information matrix",
            ));
        }
        let da = (h11 * g0 - h01 * g1) / det;
        let db = (h00 * g1 - h01 * g0) / det;
        a += da;
        b += db;
        if !a.is_finite() || !b.is_finite() || a.abs() > MAX_COEFFICIENT || b.abs() > MAX_COEFFICIENT
        {
            return Err(ModelError::non_convergence(
                "calibration",
                "coefficients diverged (separated outcomes)",
            ));
        }
        if da.abs().max(db.abs()) < TOLERANCE {
            return Ok(Calibration {
                intercept: a,
                slope: b,
                clipped,
            });
        }
    }
    Err(ModelError::non_convergence(
        "calibration",
        format!("no convergence after {} iterations", MAX_ITERATIONS),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{task_rng, Stream};
    use rand::Rng;

    #[test]
    fn well_calibrated_predictions_have_unit_slope() {
        let mut rng = task_rng(3, Stream::Simulation, 0);
        let mut scores = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..20_000 {
            let p: f64 = rng.gen_range(0.02..0.98);
            scores.push(p);
            labels.push(rng.gen::<f64>() < p);
        }
        let cal = calibration(&scores, &labels, 1e-6).unwrap();
        assert!(cal.intercept.abs() < 0.1, "intercept {}", cal.intercept);
        assert!((cal.slope - 1.0).abs() < 0.1, "slope {}", cal.slope);
        assert_eq!(cal.clipped, 0);
    }

    #[test]
    fn extreme_probabilities_are_clipped_and_counted() {
        let (v, clipped) = clipped_logit(1.0, 1e-6);
        assert!(clipped && v.is_finite());
        let scores = [0.0, 1.0, 0.3, 0.7, 0.4, 0.6];
        let labels = [false, true, true, false, false, true];
        let cal = calibration(&scores, &labels, 1e-6).unwrap();
        assert_eq!(cal.clipped, 2);
    }

    #[test]
    fn perfect_separation_does_not_converge() {
        let scores = [0.1, 0.2, 0.8, 0.9];
        let labels = [false, false, true, true];
        assert!(matches!(
            calibration(&scores, &labels, 1e-6),
            Err(ModelError::NonConvergence { .. })
        ));
    }
}
