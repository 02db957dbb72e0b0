//! Bootstrap stability of the top-N attribute set.
//!
//! A bagged-tree workflow is refit on stratified bootstrap resamples of the
//! training partition; each refit ranks attributes by impurity importance
//! and the report counts how often each attribute lands in the top N.
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::config::{ModelFamily, ModelType};
use crate::data_handling::{Dataset, Partition};
use crate::error::ModelError;
use crate::explain::consensus::descending_ranks;
use crate::partition::Partitioner;
use crate::preprocessing::Recipe;
use crate::rng::{derive_seed, Stream};
use crate::workflow::Workflow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub resamples: usize,
    pub top_n: usize,
    /// Resamples whose refit failed; excluded from the frequencies.
    pub failed: usize,
    /// Attribute name and top-N frequency, in schema order.
    pub frequencies: Vec<(String, f64)>,
}

impl StabilityReport {
    pub fn from_frequencies(
        resamples: usize,
        top_n: usize,
        failed: usize,
        frequencies: Vec<(String, f64)>,
    ) -> Self {
        StabilityReport {
            resamples,
            top_n,
            failed,
            frequencies,
        }
    }

    pub fn frequency(&self, attribute: &str) -> Option<f64> {
        self.frequencies
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, f)| *f)
    }
}

/// Whether each of the `kept` attributes lands in the top `top_n` when only
/// kept attributes compete for the slots.
fn top_n_membership(importances: &[f64], kept: &[usize], top_n: usize) -> Vec<bool> {
    let values: Vec<f64> = kept.iter().map(|&i| importances[i]).collect();
    descending_ranks(&values)
        .into_iter()
        .map(|r| r <= top_n as f64)
        .collect()
}

/// Refit `model_type` (a bagged-tree configuration) on `resamples` bootstrap
/// draws of `training` and tally top-`top_n` membership.
pub fn bootstrap_stability(
    recipe: &Recipe,
    model_type: &ModelType,
    dataset: &Dataset,
    training: &Partition,
    resamples: usize,
    top_n: usize,
    seed: u64,
) -> Result<StabilityReport, ModelError> {
    if model_type.family() != ModelFamily::BaggedTrees {
        return Err(ModelError::config(format!(
            "stability analysis needs impurity importances, {} has none",
            model_type.family()
        )));
    }
    let partitioner = Partitioner::new(seed);
    let outcomes: Vec<Option<Vec<f64>>> = (0..resamples)
        .into_par_iter()
        .map(|b| {
            let resample = partitioner.bootstrap(dataset, training, Stream::Stability, b as u64);
            let fitted = Workflow::fit(
                recipe,
                model_type,
                dataset,
                &resample,
                derive_seed(seed, Stream::Stability, b as u64),
            );
            match fitted {
                Ok(wf) => Ok(wf.attribute_importances()),
                Err(e) if e.is_recoverable_in_search() => {
                    log::debug!("Stability resample {} failed: {}", b + 1, e);
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    let schema = dataset.schema();
    let excluded = &recipe.options().exclude;
    let kept: Vec<usize> = schema
        .attributes()
        .iter()
        .enumerate()
        .filter(|(_, a)| !excluded.contains(&a.name))
        .map(|(i, _)| i)
        .collect();

    let mut counts = vec![0usize; kept.len()];
    let mut succeeded = 0usize;
    for importances in outcomes.iter().flatten() {
        succeeded += 1;
        for (c, in_top) in counts.iter_mut().zip(top_n_membership(importances, &kept, top_n)) {
            if in_top {
                *c += 1;
            }
        }
    }
    let failed = resamples - succeeded;
    if succeeded == 0 {
        return Err(ModelError::non_convergence(
            "stability",
            format!("all {} bootstrap refits failed", resamples),
        ));
    }
    if failed > 0 {
        log::warn!("{} of {} stability refits failed", failed, resamples);
    }

    let frequencies = kept
        .iter()
        .zip(counts)
        .map(|(&i, c)| {
            (
                schema.attributes()[i].name.clone(),
                c as f64 / succeeded as f64,
            )
        })
        .collect();
    Ok(StabilityReport {
        resamples,
        top_n,
        failed,
        frequencies,
    })
}
