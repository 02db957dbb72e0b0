//! Held-out evaluation of fitted workflows and pairwise model comparison.
use serde::{Deserialize, Serialize};

use crate::config::ModelFamily;
use crate::error::ModelError;
use crate::stats::bootstrap::{percentile_interval, replicates, Estimate};
use crate::stats::calibration::{calibration, Calibration};
use crate::stats::delong::{delong_test, DeLongTest};
use crate::stats::metrics::{brier_score, pr_auc, roc_auc, ClassificationMetrics};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub bootstrap_iterations: usize,
    pub confidence_level: f64,
    /// Significance level for pairwise AUC comparisons.
    pub alpha: f64,
    /// Probabilities are clamped into `[clip, 1 - clip]` before any logit.
    pub probability_clip: f64,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        EvaluationSettings {
            bootstrap_iterations: 2000,
            confidence_level: 0.95,
            alpha: 0.05,
            probability_clip: 1e-6,
        }
    }
}

impl EvaluationSettings {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.bootstrap_iterations == 0 {
            return Err(ModelError::config("bootstrap_iterations must be positive"));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ModelError::config("confidence_level must be in (0, 1)"));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ModelError::config("alpha must be in (0, 1)"));
        }
        if !(self.probability_clip > 0.0 && self.probability_clip < 0.5) {
            return Err(ModelError::config("probability_clip must be in (0, 0.5)"));
        }
        Ok(())
    }
}

// Metric order inside a bootstrap replicate.
const AUC: usize = 0;
const PR_AUC: usize = 1;
const BRIER: usize = 2;
const SLOPE: usize = 3;
const INTERCEPT: usize = 4;
const SENSITIVITY: usize = 5;
const SPECIFICITY: usize = 6;
const PPV: usize = 7;
const NPV: usize = 8;
const KAPPA: usize = 9;

/// Test-set performance of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub family: ModelFamily,
    pub n: usize,
    pub prevalence: f64,
    pub threshold: f64,
    pub auc: Estimate,
    pub pr_auc: Estimate,
    pub brier: Estimate,
    pub calibration_slope: Estimate,
    pub calibration_intercept: Estimate,
    pub sensitivity: Estimate,
    pub specificity: Estimate,
    pub ppv: Estimate,
    pub npv: Estimate,
    pub kappa: Estimate,
    pub clipped_probabilities: usize,
}

impl EvaluationResult {
    /// Largest number of undefined replicates across metrics.
    pub fn failed_bootstrap_iterations(&self) -> usize {
        [
            &self.auc,
            &self.pr_auc,
            &self.brier,
            &self.calibration_slope,
            &self.calibration_intercept,
            &self.sensitivity,
            &self.specificity,
            &self.ppv,
            &self.npv,
            &self.kappa,
        ]
        .iter()
        .map(|e| e.failed_iterations)
        .max()
        .unwrap_or(0)
    }
}

fn all_metrics(scores: &[f64], labels: &[bool], threshold: f64, clip: f64) -> Vec<Option<f64>> {
    metrics_with_calibration(scores, labels, threshold, calibration(scores, labels, clip).ok())
}

fn metrics_with_calibration(
    scores: &[f64],
    labels: &[bool],
    threshold: f64,
    cal: Option<Calibration>,
) -> Vec<Option<f64>> {
    let cls = ClassificationMetrics::at_threshold(scores, labels, threshold);
    vec![
        roc_auc(scores, labels),
        pr_auc(scores, labels),
        brier_score(scores, labels),
        cal.map(|c| c.slope),
        cal.map(|c| c.intercept),
        cls.sensitivity,
        cls.specificity,
        cls.ppv,
        cls.npv,
        cls.kappa,
    ]
}

/// Point estimates and stratified bootstrap intervals for every metric.
pub fn evaluate(
    family: ModelFamily,
    scores: &[f64],
    labels: &[bool],
    threshold: f64,
    settings: &EvaluationSettings,
    seed: u64,
) -> Result<EvaluationResult, ModelError> {
    if scores.len() != labels.len() {
        return Err(ModelError::ShapeMismatch {
            expected: labels.len(),
            got: scores.len(),
        });
    }
    if scores.is_empty() {
        return Err(ModelError::InsufficientSamples {
            class: true,
            count: 0,
            required: 1,
        });
    }
    let clip = settings.probability_clip;
    let test_calibration = match calibration(scores, labels, clip) {
        Ok(c) => Some(c),
        Err(e) => {
            log::warn!("{}: calibration undefined on test set: {}", family, e);
            None
        }
    };
    let clipped_probabilities = match &test_calibration {
        Some(c) => c.clipped,
        None => scores
            .iter()
            .filter(|&&p| p < clip || p > 1.0 - clip)
            .count(),
    };
    let point = metrics_with_calibration(scores, labels, threshold, test_calibration);
    if clipped_probabilities > 0 {
        log::warn!(
            "{}: clamped {} probabilities into [{:e}, 1 - {:e}] before taking logits",
            family,
            clipped_probabilities,
            clip,
            clip
        );
    }

    let reps = replicates(labels, settings.bootstrap_iterations, seed, |positions| {
        let s: Vec<f64> = positions.iter().map(|&i| scores[i]).collect();
        let y: Vec<bool> = positions.iter().map(|&i| labels[i]).collect();
        all_metrics(&s, &y, threshold, clip)
    });
    let interval =
        |metric: usize| percentile_interval(point[metric], &reps, metric, settings.confidence_level);

    let positives = labels.iter().filter(|&&l| l).count();
    let result = EvaluationResult {
        family,
        n: labels.len(),
        prevalence: positives as f64 / labels.len() as f64,
        threshold,
        auc: interval(AUC),
        pr_auc: interval(PR_AUC),
        brier: interval(BRIER),
        calibration_slope: interval(SLOPE),
        calibration_intercept: interval(INTERCEPT),
        sensitivity: interval(SENSITIVITY),
        specificity: interval(SPECIFICITY),
        ppv: interval(PPV),
        npv: interval(NPV),
        kappa: interval(KAPPA),
        clipped_probabilities,
    };
    if result.failed_bootstrap_iterations() > 0 {
        log::warn!(
            "{}: up to {} of {} bootstrap iterations had an undefined metric",
            family,
            result.failed_bootstrap_iterations(),
            settings.bootstrap_iterations
        );
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    FirstBetter,
    SecondBetter,
    NoSignificantDifference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub first: ModelFamily,
    pub second: ModelFamily,
    pub test: DeLongTest,
    pub verdict: Verdict,
}

/// DeLong comparison of every unordered pair of workflows.
///
/// A model is only called better when `p < alpha`.
pub fn compare_pairwise(
    predictions: &[(ModelFamily, Vec<f64>)],
    labels: &[bool],
    alpha: f64,
) -> Result<Vec<PairwiseComparison>, ModelError> {
    let mut comparisons = Vec::new();
    for (i, (first, a)) in predictions.iter().enumerate() {
        for (second, b) in &predictions[i + 1..] {
            let test = delong_test(a, b, labels)?;
            let verdict = if test.p_value >= alpha {
                Verdict::NoSignificantDifference
            } else if test.difference > 0.0 {
                Verdict::FirstBetter
            } else {
                Verdict::SecondBetter
            };
            log::info!(
                "{} vs {}: AUC {:.3} vs {:.3}, z = {:.3}, p = {:.4} ({:?})",
                first,
                second,
                test.auc_a,
                test.auc_b,
                test.z,
                test.p_value,
                verdict
            );
            comparisons.push(PairwiseComparison {
                first: *first,
                second: *second,
                test,
                verdict,
            });
        }
    }
    Ok(comparisons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{task_rng, Stream};
    use rand::Rng;

    fn noisy_scores(n: usize, noise: f64, seed: u64) -> (Vec<f64>, Vec<bool>) {
        let mut rng = task_rng(seed, Stream::Simulation, 0);
        let labels: Vec<bool> = (0..n).map(|i| i % 4 == 0).collect();
        let scores = labels
            .iter()
            .map(|&l| {
                let base = if l { 0.65 } else { 0.35 };
                (base + noise * (rng.gen::<f64>() - 0.5)).clamp(0.01, 0.99)
            })
            .collect();
        (scores, labels)
    }

    #[test]
    fn intervals_bracket_point_estimate() {
        let (scores, labels) = noisy_scores(200, 0.8, 1);
        let settings = EvaluationSettings {
            bootstrap_iterations: 200,
            ..Default::default()
        };
        let r = evaluate(ModelFamily::BaggedTrees, &scores, &labels, 0.5, &settings, 9).unwrap();
        let auc = r.auc.value.unwrap();
        assert!(r.auc.lower.unwrap() <= auc && auc <= r.auc.upper.unwrap());
        assert!((r.prevalence - 0.25).abs() < 1e-12);
        assert!(r.brier.value.unwrap() > 0.0);
    }

    #[test]
    fn calibration_point_and_clip_count_come_from_one_fit() {
        let (mut scores, labels) = noisy_scores(200, 0.8, 3);
        scores[1] = 0.0;
        scores[2] = 1.0;
        let settings = EvaluationSettings {
            bootstrap_iterations: 20,
            probability_clip: 0.02,
            ..Default::default()
        };
        let direct = calibration(&scores, &labels, settings.probability_clip).unwrap();
        let r = evaluate(ModelFamily::BaggedTrees, &scores, &labels, 0.5, &settings, 3).unwrap();
        assert_eq!(r.calibration_slope.value, Some(direct.slope));
        assert_eq!(r.calibration_intercept.value, Some(direct.intercept));
        assert_eq!(r.clipped_probabilities, direct.clipped);
        assert!(r.clipped_probabilities >= 2);
    }

    #[test]
    fn strong_model_beats_noise() {
        let (good, labels) = noisy_scores(300, 0.4, 2);
        let mut rng = task_rng(4, Stream::Simulation, 1);
        let noise: Vec<f64> = labels.iter().map(|_| rng.gen::<f64>()).collect();
        let cmp = compare_pairwise(
            &[
                (ModelFamily::BoostedTrees, good),
                (ModelFamily::KernelMachine, noise),
            ],
            &labels,
            0.05,
        )
        .unwrap();
        assert_eq!(cmp.len(), 1);
        assert_eq!(cmp[0].verdict, Verdict::FirstBetter);
    }

    #[test]
    fn settings_are_validated() {
        let bad = EvaluationSettings {
            confidence_level: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(EvaluationSettings::default().validate().is_ok());
    }
}
