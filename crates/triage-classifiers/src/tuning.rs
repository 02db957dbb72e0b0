//! Hyperparameter search with shared cross-validation folds.
//!
//! Every (configuration, fold) pair is an independent work unit with its own
//! derived seed. Units run on the rayon pool and are reduced in index order,
//! so the selected configuration does not depend on scheduling.
use itertools_num::linspace;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::config::{ModelFamily, ModelType};
use crate::data_handling::{Dataset, Partition};
use crate::error::{ModelError, RunDiagnostics};
use crate::partition::Fold;
use crate::preprocessing::Recipe;
use crate::rng::{derive_seed, derive_seed_path, task_rng, Stream};
use crate::stats::metrics::roc_auc;
use crate::workflow::Workflow;

/// Score given to configurations that could not be evaluated.
pub const WORST_AUC: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Linear,
    Log10,
}

/// One searched hyperparameter and its closed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub low: f64,
    pub high: f64,
    pub scale: Scale,
}

impl Dimension {
    pub fn linear(name: &str, low: f64, high: f64) -> Self {
        Dimension {
            name: name.to_string(),
            low,
            high,
            scale: Scale::Linear,
        }
    }

    pub fn log10(name: &str, low: f64, high: f64) -> Self {
        Dimension {
            name: name.to_string(),
            low,
            high,
            scale: Scale::Log10,
        }
    }

    fn bounds(&self) -> (f64, f64) {
        match self.scale {
            Scale::Linear => (self.low, self.high),
            Scale::Log10 => (self.low.log10(), self.high.log10()),
        }
    }

    /// Map `u` in `[0, 1]` onto the range.
    fn at(&self, u: f64) -> f64 {
        let (lo, hi) = self.bounds();
        let v = lo + u * (hi - lo);
        match self.scale {
            Scale::Linear => v,
            Scale::Log10 => 10f64.powf(v),
        }
    }

    fn levels(&self, n: usize) -> Vec<f64> {
        let (lo, hi) = self.bounds();
        linspace(lo, hi, n)
            .map(|v| match self.scale {
                Scale::Linear => v,
                Scale::Log10 => 10f64.powf(v),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    RegularGrid,
    LatinHypercube,
}

/// Search space of one model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    /// Hyperparameters not being searched are taken from here.
    pub base: ModelType,
    pub dimensions: Vec<Dimension>,
    /// Levels per dimension of a regular grid.
    pub grid_levels: usize,
    /// Design size of a Latin hypercube.
    pub latin_hypercube_size: usize,
}

impl SearchSpace {
    pub fn default_for(family: ModelFamily) -> Self {
        let base = ModelType::default_for(family);
        match family {
            ModelFamily::BaggedTrees => SearchSpace {
                base,
                dimensions: vec![
                    Dimension::linear("mtry", 1.0, 6.0),
                    Dimension::linear("min_samples_leaf", 2.0, 20.0),
                ],
                grid_levels: 4,
                latin_hypercube_size: 10,
            },
            ModelFamily::BoostedTrees => SearchSpace {
                base,
                dimensions: vec![
                    Dimension::linear("max_depth", 2.0, 6.0),
                    Dimension::linear("num_boost_round", 20.0, 150.0),
                    Dimension::log10("learning_rate", 0.01, 0.3),
                ],
                grid_levels: 3,
                latin_hypercube_size: 10,
            },
            ModelFamily::KernelMachine => SearchSpace {
                base,
                dimensions: vec![
                    Dimension::log10("c", 0.1, 10.0),
                    Dimension::log10("gaussian_kernel_eps", 0.5, 50.0),
                ],
                grid_levels: 4,
                latin_hypercube_size: 10,
            },
        }
    }

    /// Regular grid for up to two dimensions, Latin hypercube beyond.
    pub fn strategy(&self) -> SearchStrategy {
        if self.dimensions.len() <= 2 {
            SearchStrategy::RegularGrid
        } else {
            SearchStrategy::LatinHypercube
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for d in &self.dimensions {
            if !(d.low.is_finite() && d.high.is_finite() && d.low <= d.high) {
                return Err(ModelError::config(format!(
                    "dimension '{}' has an invalid range [{}, {}]",
                    d.name, d.low, d.high
                )));
            }
            if d.scale == Scale::Log10 && d.low <= 0.0 {
                return Err(ModelError::config(format!(
                    "log-scaled dimension '{}' must be positive",
                    d.name
                )));
            }
            // Reject names the family does not know.
            self.base.with_hyperparameter(&d.name, d.low)?;
        }
        match self.strategy() {
            SearchStrategy::RegularGrid if self.grid_levels == 0 => {
                Err(ModelError::config("grid_levels must be positive"))
            }
            SearchStrategy::LatinHypercube if self.latin_hypercube_size == 0 => {
                Err(ModelError::config("latin_hypercube_size must be positive"))
            }
            _ => Ok(()),
        }
    }

    /// Candidate configurations in evaluation order.
    ///
    /// Integer hyperparameters are rounded, and configurations that become
    /// identical after rounding are kept once.
    pub fn candidates(&self, seed: u64) -> Result<Vec<ModelType>, ModelError> {
        let points: Vec<Vec<f64>> = match self.strategy() {
            SearchStrategy::RegularGrid => {
                let mut points = vec![Vec::new()];
                for d in &self.dimensions {
                    let levels = d.levels(self.grid_levels);
                    points = points
                        .into_iter()
                        .flat_map(|p| {
                            levels.iter().map(move |&v| {
                                let mut q = p.clone();
                                q.push(v);
                                q
                            })
                        })
                        .collect();
                }
                points
            }
            SearchStrategy::LatinHypercube => {
                let n = self.latin_hypercube_size;
                let mut rng = task_rng(seed, Stream::Search, self.base.family().index());
                let columns: Vec<Vec<f64>> = self
                    .dimensions
                    .iter()
                    .map(|d| {
                        let mut strata: Vec<usize> = (0..n).collect();
                        strata.shuffle(&mut rng);
                        strata
                            .into_iter()
                            .map(|s| d.at((s as f64 + rng.gen::<f64>()) / n as f64))
                            .collect()
                    })
                    .collect();
                (0..n)
                    .map(|i| columns.iter().map(|c| c[i]).collect())
                    .collect()
            }
        };

        let mut candidates: Vec<ModelType> = Vec::with_capacity(points.len());
        for point in points {
            let mut model = self.base.clone();
            for (d, v) in self.dimensions.iter().zip(point) {
                model = model.with_hyperparameter(&d.name, v)?;
            }
            if !candidates.contains(&model) {
                candidates.push(model);
            }
        }
        Ok(candidates)
    }
}

/// Cross-validated score of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub model_type: ModelType,
    /// Validation AUC per fold; `None` where the fold failed.
    pub fold_auc: Vec<Option<f64>>,
    pub failed_folds: usize,
    /// Set when failures exceeded the budget; `mean_auc` is then `WORST_AUC`.
    pub abandoned: bool,
    pub mean_auc: f64,
}

pub struct TuningResult {
    pub family: ModelFamily,
    pub strategy: SearchStrategy,
    pub candidates: Vec<CandidateScore>,
    pub best: usize,
    /// Winning configuration refit on the whole training partition.
    pub workflow: Workflow,
    /// Out-of-fold predictions of the winning configuration on the training
    /// partition, with matching labels.
    pub out_of_fold_scores: Vec<f64>,
    pub out_of_fold_labels: Vec<bool>,
    pub diagnostics: RunDiagnostics,
}

impl TuningResult {
    pub fn best_candidate(&self) -> &CandidateScore {
        &self.candidates[self.best]
    }
}

struct FoldOutcome {
    auc: Option<f64>,
    predictions: Option<Vec<f64>>,
}

/// Evaluates configurations of any family on one fixed set of folds.
pub struct ModelTrainer<'a> {
    recipe: &'a Recipe,
    dataset: &'a Dataset,
    training: &'a Partition,
    folds: &'a [Fold],
    seed: u64,
    max_failed_folds: usize,
}

impl<'a> ModelTrainer<'a> {
    pub fn new(
        recipe: &'a Recipe,
        dataset: &'a Dataset,
        training: &'a Partition,
        folds: &'a [Fold],
        seed: u64,
        max_failed_folds: usize,
    ) -> Self {
        ModelTrainer {
            recipe,
            dataset,
            training,
            folds,
            seed,
            max_failed_folds,
        }
    }

    fn run_unit(
        &self,
        family: ModelFamily,
        config: usize,
        model_type: &ModelType,
        fold: &Fold,
    ) -> Result<FoldOutcome, ModelError> {
        let seed = derive_seed_path(
            self.seed,
            Stream::Search,
            &[family.index(), config as u64, fold.index as u64],
        );
        let scored = Workflow::fit(self.recipe, model_type, self.dataset, &fold.train, seed)
            .and_then(|wf| wf.predict_partition(self.dataset, &fold.validation));
        match scored {
            Ok(predictions) => {
                let auc = roc_auc(&predictions, &fold.validation.labels(self.dataset));
                Ok(FoldOutcome {
                    auc,
                    predictions: Some(predictions),
                })
            }
            Err(e) if e.is_recoverable_in_search() => {
                log::debug!(
                    "{} configuration {} failed on fold {}: {}",
                    family,
                    config + 1,
                    fold.index + 1,
                    e
                );
                Ok(FoldOutcome {
                    auc: None,
                    predictions: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Search `space`, pick the configuration with the highest mean
    /// validation AUC (lowest index on ties) and refit it on the training
    /// partition.
    pub fn tune(&self, space: &SearchSpace) -> Result<TuningResult, ModelError> {
        space.validate()?;
        let family = space.base.family();
        let configs = space.candidates(self.seed)?;
        let n_folds = self.folds.len();
        log::info!(
            "Tuning {}: {} configurations x {} folds ({:?})",
            family,
            configs.len(),
            n_folds,
            space.strategy()
        );

        let outcomes = (0..configs.len() * n_folds)
            .into_par_iter()
            .map(|unit| {
                let (c, f) = (unit / n_folds, unit % n_folds);
                self.run_unit(family, c, &configs[c], &self.folds[f])
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let mut diagnostics = RunDiagnostics::default();
        let mut candidates = Vec::with_capacity(configs.len());
        for (c, model_type) in configs.into_iter().enumerate() {
            let fold_auc: Vec<Option<f64>> = outcomes[c * n_folds..(c + 1) * n_folds]
                .iter()
                .map(|o| o.auc)
                .collect();
            let failed_folds = fold_auc.iter().filter(|a| a.is_none()).count();
            let abandoned = failed_folds > self.max_failed_folds || failed_folds == n_folds;
            let mean_auc = if abandoned {
                WORST_AUC
            } else {
                let ok: Vec<f64> = fold_auc.iter().flatten().copied().collect();
                ok.iter().sum::<f64>() / ok.len() as f64
            };
            diagnostics.failed_folds += failed_folds;
            if abandoned {
                diagnostics.failed_configurations += 1;
                log::warn!(
                    "{} configuration {} ({}) abandoned after {} failed folds",
                    family,
                    c + 1,
                    model_type.describe(),
                    failed_folds
                );
            } else {
                log::debug!(
                    "{} configuration {} ({}): mean AUC {:.4}",
                    family,
                    c + 1,
                    model_type.describe(),
                    mean_auc
                );
            }
            candidates.push(CandidateScore {
                model_type,
                fold_auc,
                failed_folds,
                abandoned,
                mean_auc,
            });
        }

        let best = candidates
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.abandoned)
            .fold(None, |best: Option<(usize, f64)>, (i, s)| match best {
                Some((_, b)) if b >= s.mean_auc => best,
                _ => Some((i, s.mean_auc)),
            })
            .map(|(i, _)| i)
            .ok_or_else(|| {
                ModelError::non_convergence(
                    family.as_str(),
                    "every hyperparameter configuration failed",
                )
            })?;

        let mut out_of_fold_scores = Vec::with_capacity(self.training.len());
        let mut out_of_fold_labels = Vec::with_capacity(self.training.len());
        for (fold, outcome) in self
            .folds
            .iter()
            .zip(&outcomes[best * n_folds..(best + 1) * n_folds])
        {
            if let Some(predictions) = &outcome.predictions {
                out_of_fold_scores.extend_from_slice(predictions);
                out_of_fold_labels.extend(fold.validation.labels(self.dataset));
            }
        }

        let model_type = candidates[best].model_type.clone();
        log::info!(
            "{}: selected {} (mean AUC {:.4}); refitting on {} training patients",
            family,
            model_type.describe(),
            candidates[best].mean_auc,
            self.training.len()
        );
        let workflow = Workflow::fit(
            self.recipe,
            &model_type,
            self.dataset,
            self.training,
            derive_seed(self.seed, Stream::Estimator, family.index()),
        )?;

        Ok(TuningResult {
            family,
            strategy: space.strategy(),
            candidates,
            best,
            workflow,
            out_of_fold_scores,
            out_of_fold_labels,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Partitioner;
    use crate::preprocessing::RecipeOptions;
    use crate::synthetic::simulate_cohort;

    #[test]
    fn two_dimensions_use_a_deduplicated_grid() {
        let space = SearchSpace {
            grid_levels: 3,
            ..SearchSpace::default_for(ModelFamily::KernelMachine)
        };
        assert_eq!(space.strategy(), SearchStrategy::RegularGrid);
        let c = space.candidates(1).unwrap();
        assert_eq!(c.len(), 9);
        assert_eq!(c, space.candidates(2).unwrap());

        // mtry levels over [1, 2] collapse after rounding.
        let mut forest = SearchSpace::default_for(ModelFamily::BaggedTrees);
        forest.dimensions = vec![Dimension::linear("mtry", 1.0, 2.0)];
        forest.grid_levels = 5;
        assert_eq!(forest.candidates(0).unwrap().len(), 2);
    }

    #[test]
    fn three_dimensions_use_a_seeded_latin_hypercube() {
        let space = SearchSpace {
            latin_hypercube_size: 6,
            ..SearchSpace::default_for(ModelFamily::BoostedTrees)
        };
        assert_eq!(space.strategy(), SearchStrategy::LatinHypercube);
        let a = space.candidates(4).unwrap();
        assert_eq!(a, space.candidates(4).unwrap());
        assert!(a.len() <= 6);
        for m in &a {
            let ModelType::GBDT {
                max_depth,
                learning_rate,
                ..
            } = m
            else {
                panic!("wrong family");
            };
            assert!((2..=6).contains(max_depth));
            assert!(*learning_rate >= 0.0099 && *learning_rate <= 0.301);
        }
    }

    #[test]
    fn unknown_dimension_is_rejected() {
        let mut space = SearchSpace::default_for(ModelFamily::KernelMachine);
        space.dimensions.push(Dimension::linear("mtry", 1.0, 3.0));
        assert!(space.validate().is_err());
    }

    #[test]
    fn failing_configurations_score_worst_and_search_continues() {
        let ds = simulate_cohort(240, 13);
        let all = ds.full_partition();
        let folds = Partitioner::new(3).stratified_folds(&ds, &all, 3).unwrap();
        let recipe = Recipe::new(RecipeOptions::default());
        let mut space = SearchSpace::default_for(ModelFamily::KernelMachine);
        // c = 0 is rejected by the kernel machine on every fold.
        space.dimensions = vec![Dimension::linear("c", 0.0, 1.0)];
        space.grid_levels = 2;

        let trainer = ModelTrainer::new(&recipe, &ds, &all, &folds, 9, 0);
        let result = trainer.tune(&space).unwrap();
        assert_eq!(result.candidates.len(), 2);
        assert!(result.candidates[0].abandoned);
        assert_eq!(result.candidates[0].mean_auc, WORST_AUC);
        assert_eq!(result.candidates[0].failed_folds, 3);
        assert_eq!(result.best, 1);
        assert_eq!(result.diagnostics.failed_configurations, 1);
        assert_eq!(result.out_of_fold_scores.len(), all.len());
        assert_eq!(result.out_of_fold_labels.len(), all.len());
        assert!(result.best_candidate().mean_auc > 0.6);
    }
}
