//! Operating-point selection by Youden's J statistic.
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    /// Patients with a probability at or above this value are called positive.
    pub threshold: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub youden_j: f64,
}

/// Threshold maximising `sensitivity + specificity - 1` over the observed
/// probabilities. On ties the lowest threshold wins.
///
/// Callers pass out-of-fold training predictions; test predictions must
/// never reach this function.
pub fn youden_threshold(scores: &[f64], labels: &[bool]) -> Result<OperatingPoint, ModelError> {
    if scores.len() != labels.len() {
        return Err(ModelError::ShapeMismatch {
            expected: labels.len(),
            got: scores.len(),
        });
    }
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(ModelError::InsufficientSamples {
            class: positives == 0,
            count: 0,
            required: 1,
        });
    }

    // Walk thresholds from high to low; everything at or above the current
    // score is positive.
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut best: Option<OperatingPoint> = None;
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut i = 0;
    while i < order.len() {
        let t = scores[order[i]];
        while i < order.len() && scores[order[i]] == t {
            if labels[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let sensitivity = tp as f64 / positives as f64;
        let specificity = (negatives - fp) as f64 / negatives as f64;
        let j = sensitivity + specificity - 1.0;
        // Descending walk: ">=" lets a lower threshold replace an equal J.
        if best.map_or(true, |b| j >= b.youden_j) {
            best = Some(OperatingPoint {
                threshold: t,
                sensitivity,
                specificity,
                youden_j: j,
            });
        }
    }

    let point = best.ok_or_else(|| ModelError::InsufficientSamples {
        class: true,
        count: 0,
        required: 1,
    })?;
    log::debug!(
        "Youden threshold {:.4} (sens {:.3}, spec {:.3}, J {:.3})",
        point.threshold,
        point.sensitivity,
        point.specificity,
        point.youden_j
    );
    Ok(point)
}
