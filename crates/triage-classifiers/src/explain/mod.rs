//! Patient-level attributions, cross-model consensus and bootstrap stability.

pub mod consensus;
pub mod shapley;
pub mod stability;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::data_handling::{Dataset, Partition, PatientRecord};
use crate::error::ModelError;
use crate::rng::{task_rng, Stream};

use self::shapley::ShapleySettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplanationSettings {
    pub shapley: ShapleySettings,
    /// Real training patients used as the reference distribution.
    pub background_size: usize,
    /// Cap on test patients explained per model; all when unset.
    pub max_explained_patients: Option<usize>,
    /// Rank cut-off used for the cross-model top-K frequency.
    pub top_k: usize,
    pub stability_resamples: usize,
    /// Size of the top-N set counted by the stability analysis.
    pub stability_top_n: usize,
    /// Retention requires a consensus mean rank at or below this value.
    pub max_consensus_rank: f64,
    /// Retention requires a top-N frequency at or above this value.
    pub min_stability: f64,
}

impl Default for ExplanationSettings {
    fn default() -> Self {
        ExplanationSettings {
            shapley: ShapleySettings::default(),
            background_size: 50,
            max_explained_patients: None,
            top_k: 3,
            stability_resamples: 100,
            stability_top_n: 5,
            max_consensus_rank: 4.0,
            min_stability: 0.7,
        }
    }
}

impl ExplanationSettings {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.shapley.permutations == 0 {
            return Err(ModelError::config("shapley.permutations must be positive"));
        }
        if self.background_size < 2 {
            return Err(ModelError::config("background_size must be at least 2"));
        }
        if self.top_k == 0 || self.stability_top_n == 0 || self.stability_resamples == 0 {
            return Err(ModelError::config(
                "top_k, stability_top_n and stability_resamples must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_stability) {
            return Err(ModelError::config("min_stability must be in [0, 1]"));
        }
        if !(self.max_consensus_rank >= 1.0) {
            return Err(ModelError::config("max_consensus_rank must be at least 1"));
        }
        Ok(())
    }
}

/// Stratified sample of real patients from `partition`.
///
/// Each class contributes in proportion to its prevalence, with at least one
/// record per class present. No synthetic records are ever included.
pub fn background_sample(
    dataset: &Dataset,
    partition: &Partition,
    size: usize,
    seed: u64,
) -> Result<Vec<PatientRecord>, ModelError> {
    if partition.is_empty() {
        return Err(ModelError::InsufficientSamples {
            class: true,
            count: 0,
            required: 1,
        });
    }
    let mut rng = task_rng(seed, Stream::Background, 0);
    let size = size.clamp(1, partition.len());
    let mut positives: Vec<usize> = partition
        .indices()
        .iter()
        .copied()
        .filter(|&i| dataset.outcome(i))
        .collect();
    let mut negatives: Vec<usize> = partition
        .indices()
        .iter()
        .copied()
        .filter(|&i| !dataset.outcome(i))
        .collect();
    positives.shuffle(&mut rng);
    negatives.shuffle(&mut rng);

    let wanted = (size as f64 * positives.len() as f64 / partition.len() as f64).round() as usize;
    let lower = usize::from(!positives.is_empty() && size > 1);
    let upper = if negatives.is_empty() { size } else { size - 1 };
    let n_pos = wanted.clamp(lower, upper.max(lower)).min(positives.len());
    let n_neg = (size - n_pos).min(negatives.len());

    let mut chosen: Vec<usize> = positives[..n_pos]
        .iter()
        .chain(&negatives[..n_neg])
        .copied()
        .collect();
    chosen.sort_unstable();
    log::debug!(
        "Background sample: {} patients ({} deceased) from {}",
        chosen.len(),
        n_pos,
        partition.name()
    );
    Ok(chosen.iter().map(|&i| dataset.record(i).clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::simulate_cohort;

    #[test]
    fn background_is_stratified_and_deterministic() {
        let ds = simulate_cohort(400, 12);
        let all = ds.full_partition();
        let a = background_sample(&ds, &all, 40, 3).unwrap();
        let b = background_sample(&ds, &all, 40, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);

        let prevalence = all.prevalence(&ds);
        let deceased = ds
            .records()
            .iter()
            .zip(ds.outcomes())
            .filter(|(r, &o)| o && a.contains(*r))
            .count();
        assert!(deceased >= 1);
        assert!((deceased as f64 - 40.0 * prevalence).abs() <= 2.0);
    }
}
