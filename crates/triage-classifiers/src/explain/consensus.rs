//! Global importance per model and rank agreement across models.
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::config::ModelFamily;
use crate::data_handling::PatientRecord;
use crate::error::ModelError;
use crate::explain::shapley::ShapleySettings;
use crate::explain::stability::StabilityReport;
use crate::rng::{derive_seed, Stream};
use crate::workflow::Workflow;

/// Mean absolute Shapley value per attribute for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalImportance {
    pub family: ModelFamily,
    pub attributes: Vec<String>,
    pub mean_abs_contribution: Vec<f64>,
    /// Rank 1 is the most important attribute.
    pub ranks: Vec<f64>,
}

/// Strict descending ranks; equal values keep their input order.
pub fn descending_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    let mut ranks = vec![0.0; values.len()];
    for (rank, &i) in order.iter().enumerate() {
        ranks[i] = (rank + 1) as f64;
    }
    ranks
}

/// Explain every record in `records` and average |contribution| per attribute.
///
/// Patient `i` is explained with seed `derive_seed(seed, Shapley, i)`.
pub fn global_importance(
    workflow: &Workflow,
    records: &[PatientRecord],
    background: &[PatientRecord],
    settings: &ShapleySettings,
    seed: u64,
) -> Result<GlobalImportance, ModelError> {
    if records.is_empty() {
        return Err(ModelError::InsufficientSamples {
            class: true,
            count: 0,
            required: 1,
        });
    }
    let sets = (0..records.len())
        .into_par_iter()
        .map(|i| {
            workflow.explain(
                &records[i],
                background,
                settings,
                derive_seed(seed, Stream::Shapley, i as u64),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let attributes: Vec<String> = sets[0]
        .contributions
        .iter()
        .map(|a| a.attribute.clone())
        .collect();
    let mut totals = vec![0.0; attributes.len()];
    for set in &sets {
        for (t, a) in totals.iter_mut().zip(&set.contributions) {
            *t += a.contribution.abs();
        }
    }
    let mean_abs_contribution: Vec<f64> = totals.iter().map(|t| t / sets.len() as f64).collect();
    let ranks = descending_ranks(&mean_abs_contribution);
    log::debug!(
        "{} global importance: {:?}",
        workflow.family(),
        attributes.iter().zip(&mean_abs_contribution).collect::<Vec<_>>()
    );
    Ok(GlobalImportance {
        family: workflow.family(),
        attributes,
        mean_abs_contribution,
        ranks,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusEntry {
    pub attribute: String,
    pub mean_rank: f64,
    /// Sample standard deviation of the per-model ranks (0 for one model).
    pub rank_sd: f64,
    /// Share of models that rank the attribute within the top K.
    pub top_k_frequency: f64,
    pub stability: Option<f64>,
    pub retained: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCorrelation {
    pub first: ModelFamily,
    pub second: ModelFamily,
    pub spearman: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRanking {
    pub top_k: usize,
    /// Sorted by mean rank, most important first.
    pub entries: Vec<ConsensusEntry>,
    pub correlations: Vec<RankCorrelation>,
}

/// Spearman correlation of two rank vectors without ties.
pub fn spearman(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if a.len() < 2 {
        return 1.0;
    }
    let d2: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    1.0 - 6.0 * d2 / (n * (n * n - 1.0))
}

/// Combine per-model rankings into one consensus ranking.
pub fn consensus_ranking(
    importances: &[GlobalImportance],
    top_k: usize,
) -> Result<ConsensusRanking, ModelError> {
    let first = importances.first().ok_or_else(|| {
        ModelError::config("consensus ranking needs at least one model")
    })?;
    for other in &importances[1..] {
        if other.attributes != first.attributes {
            return Err(ModelError::schema(format!(
                "{} and {} explain different attributes",
                first.family, other.family
            )));
        }
    }
    let m = importances.len() as f64;
    let mut entries: Vec<ConsensusEntry> = first
        .attributes
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let ranks: Vec<f64> = importances.iter().map(|g| g.ranks[i]).collect();
            let mean_rank = ranks.iter().sum::<f64>() / m;
            let rank_sd = if ranks.len() > 1 {
                (ranks.iter().map(|r| (r - mean_rank).powi(2)).sum::<f64>() / (m - 1.0)).sqrt()
            } else {
                0.0
            };
            let in_top = ranks.iter().filter(|&&r| r <= top_k as f64).count();
            ConsensusEntry {
                attribute: name.clone(),
                mean_rank,
                rank_sd,
                top_k_frequency: in_top as f64 / m,
                stability: None,
                retained: false,
            }
        })
        .collect();
    // Stable sort keeps schema order among equal mean ranks.
    entries.sort_by(|a, b| a.mean_rank.total_cmp(&b.mean_rank));

    let mut correlations = Vec::new();
    for (i, a) in importances.iter().enumerate() {
        for b in &importances[i + 1..] {
            correlations.push(RankCorrelation {
                first: a.family,
                second: b.family,
                spearman: spearman(&a.ranks, &b.ranks),
            });
        }
    }
    Ok(ConsensusRanking {
        top_k,
        entries,
        correlations,
    })
}

impl ConsensusRanking {
    /// Attach stability frequencies and mark attributes meeting both
    /// retention thresholds. Returns the retained attribute names in
    /// consensus order.
    pub fn apply_retention(
        &mut self,
        stability: &StabilityReport,
        max_consensus_rank: f64,
        min_stability: f64,
    ) -> Vec<String> {
        let mut retained = Vec::new();
        for entry in self.entries.iter_mut() {
            entry.stability = stability.frequency(&entry.attribute);
            entry.retained = entry.mean_rank <= max_consensus_rank
                && entry.stability.map_or(false, |s| s >= min_stability);
            if entry.retained {
                retained.push(entry.attribute.clone());
            }
        }
        log::info!("Retained attributes: {:?}", retained);
        retained
    }
}
