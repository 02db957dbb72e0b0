use serde::{Deserialize, Serialize};

fn class_counts(labels: &[bool]) -> (usize, usize) {
    let positives = labels.iter().filter(|&&l| l).count();
    (positives, labels.len() - positives)
}

/// Average ranks (1-based) with ties sharing their mid-rank.
pub fn mid_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i + 1;
        while j < order.len() && values[order[j]] == values[order[i]] {
            j += 1;
        }
        // Positions i..j share ranks i+1..=j.
        let rank = (i + j + 1) as f64 / 2.0;
        for &k in &order[i..j] {
            ranks[k] = rank;
        }
        i = j;
    }
    ranks
}

/// Area under the ROC curve via the Mann-Whitney U statistic.
///
/// `None` when either class is absent.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    let (pos, neg) = class_counts(labels);
    if pos == 0 || neg == 0 || scores.len() != labels.len() {
        return None;
    }
    let ranks = mid_ranks(scores);
    let rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|(_, &l)| l)
        .map(|(r, _)| *r)
        .sum();
    let pos = pos as f64;
    let u = rank_sum - pos * (pos + 1.0) / 2.0;
    Some(u / (pos * neg as f64))
}

/// Area under the precision-recall curve (trapezoidal, ties grouped).
///
/// The curve starts at recall 0 with the precision of the first group.
pub fn pr_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    let (pos, _) = class_counts(labels);
    if pos == 0 || scores.len() != labels.len() {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut area = 0.0;
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut prev_recall = 0.0;
    let mut prev_precision: Option<f64> = None;
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
        let recall = tp as f64 / pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        let left = prev_precision.unwrap_or(precision);
        area += (recall - prev_recall) * (left + precision) / 2.0;
        prev_recall = recall;
        prev_precision = Some(precision);
    }
    Some(area)
}

/// Mean squared difference between probability and outcome.
pub fn brier_score(scores: &[f64], labels: &[bool]) -> Option<f64> {
    if scores.is_empty() || scores.len() != labels.len() {
        return None;
    }
    let sum: f64 = scores
        .iter()
        .zip(labels)
        .map(|(&p, &y)| {
            let y = if y { 1.0 } else { 0.0 };
            (p - y).powi(2)
        })
        .sum();
    Some(sum / scores.len() as f64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    /// Counts with `score >= threshold` called positive.
    pub fn at_threshold(scores: &[f64], labels: &[bool], threshold: f64) -> Self {
        let mut counts = ConfusionCounts::default();
        for (&p, &y) in scores.iter().zip(labels) {
            match (p >= threshold, y) {
                (true, true) => counts.true_positive += 1,
                (true, false) => counts.false_positive += 1,
                (false, false) => counts.true_negative += 1,
                (false, true) => counts.false_negative += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

/// Threshold-dependent metrics. Each is `None` when its denominator is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub sensitivity: Option<f64>,
    pub specificity: Option<f64>,
    pub ppv: Option<f64>,
    pub npv: Option<f64>,
    pub kappa: Option<f64>,
}

impl ClassificationMetrics {
    pub fn from_counts(c: &ConfusionCounts) -> Self {
        let n = c.total();
        let kappa = if n == 0 {
            None
        } else {
            let n = n as f64;
            let observed = (c.true_positive + c.true_negative) as f64 / n;
            let predicted_pos = (c.true_positive + c.false_positive) as f64;
            let predicted_neg = (c.true_negative + c.false_negative) as f64;
            let actual_pos = (c.true_positive + c.false_negative) as f64;
            let actual_neg = (c.true_negative + c.false_positive) as f64;
            let expected = (predicted_pos * actual_pos + predicted_neg * actual_neg) / (n * n);
            (expected < 1.0).then(|| (observed - expected) / (1.0 - expected))
        };
        ClassificationMetrics {
            sensitivity: ratio(c.true_positive, c.true_positive + c.false_negative),
            specificity: ratio(c.true_negative, c.true_negative + c.false_positive),
            ppv: ratio(c.true_positive, c.true_positive + c.false_positive),
            npv: ratio(c.true_negative, c.true_negative + c.false_negative),
            kappa,
        }
    }

    pub fn at_threshold(scores: &[f64], labels: &[bool], threshold: f64) -> Self {
        Self::from_counts(&ConfusionCounts::at_threshold(scores, labels, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auc_handles_ties_with_half_credit() {
        assert_eq!(roc_auc(&[0.1, 0.9], &[false, true]), Some(1.0));
        assert_eq!(roc_auc(&[0.9, 0.1], &[false, true]), Some(0.0));
        assert_eq!(roc_auc(&[0.5, 0.5], &[false, true]), Some(0.5));
        assert_eq!(roc_auc(&[0.5, 0.5], &[true, true]), None);
    }

    #[test]
    fn auc_matches_pair_count() {
        let scores = [0.2, 0.4, 0.35, 0.8, 0.1];
        let labels = [false, true, false, true, false];
        // Positive/negative pairs: (0.4 vs 0.2, 0.35, 0.1) all win, 0.8 wins all.
        assert!((roc_auc(&scores, &labels).unwrap() - 1.0).abs() < 1e-12);
        let labels = [true, false, false, true, false];
        // 0.2 beats 0.1 only; 0.8 beats all three.
        let expected = (1.0 + 3.0) / 6.0;
        assert!((roc_auc(&scores, &labels).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn pr_auc_is_one_for_perfect_ranking() {
        let scores = [0.9, 0.8, 0.3, 0.2];
        let labels = [true, true, false, false];
        assert!((pr_auc(&scores, &labels).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(pr_auc(&scores, &[false; 4]), None);
    }

    #[test]
    fn brier_and_kappa() {
        assert_eq!(brier_score(&[1.0, 0.0], &[true, false]), Some(0.0));
        assert_eq!(brier_score(&[0.5, 0.5], &[true, false]), Some(0.25));

        let m = ClassificationMetrics::at_threshold(
            &[0.9, 0.8, 0.2, 0.1],
            &[true, true, false, false],
            0.5,
        );
        assert_eq!(m.sensitivity, Some(1.0));
        assert_eq!(m.specificity, Some(1.0));
        assert_eq!(m.kappa, Some(1.0));

        // Everything predicted positive: NPV undefined, kappa zero.
        let m = ClassificationMetrics::at_threshold(&[0.9, 0.8], &[true, false], 0.1);
        assert_eq!(m.npv, None);
        assert_eq!(m.kappa, Some(0.0));
    }
}
