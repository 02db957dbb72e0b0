//! End-to-end study: split, tune, threshold, evaluate, compare, explain.
//!
//! The test partition is touched exactly once per family, after the
//! workflow and its threshold are frozen.
use serde::{Deserialize, Serialize};

use crate::config::{ModelFamily, StudyConfig};
use crate::data_handling::{Dataset, Partition};
use crate::error::{ModelError, RunDiagnostics};
use crate::explain::background_sample;
use crate::explain::consensus::{
    consensus_ranking, global_importance, ConsensusRanking, GlobalImportance,
};
use crate::explain::stability::{bootstrap_stability, StabilityReport};
use crate::partition::{Fold, Partitioner};
use crate::preprocessing::Recipe;
use crate::rng::{derive_seed, Stream};
use crate::stats::compare::{compare_pairwise, evaluate, EvaluationResult, PairwiseComparison};
use crate::stats::metrics::roc_auc;
use crate::threshold::{youden_threshold, OperatingPoint};
use crate::tuning::{CandidateScore, ModelTrainer, SearchStrategy, TuningResult};
use crate::workflow::ModelBundle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningSummary {
    pub family: ModelFamily,
    pub strategy: SearchStrategy,
    pub candidates: Vec<CandidateScore>,
    pub best: usize,
    pub operating_point: OperatingPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyReport {
    pub seed: u64,
    pub n_patients: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub prevalence_train: f64,
    pub prevalence_test: f64,
    pub tuning: Vec<TuningSummary>,
    pub evaluations: Vec<EvaluationResult>,
    pub comparisons: Vec<PairwiseComparison>,
    pub importance: Vec<GlobalImportance>,
    pub consensus: ConsensusRanking,
    pub stability: StabilityReport,
    pub retained_attributes: Vec<String>,
    pub diagnostics: RunDiagnostics,
}

pub struct StudyOutcome {
    pub bundles: Vec<ModelBundle>,
    pub report: StudyReport,
}

impl StudyOutcome {
    pub fn bundle(&self, family: ModelFamily) -> Option<&ModelBundle> {
        self.bundles.iter().find(|b| b.family() == family)
    }
}

/// Test AUC of one family with and without an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AblationResult {
    pub family: ModelFamily,
    pub attribute: String,
    pub full_auc: f64,
    pub ablated_auc: f64,
}

impl AblationResult {
    pub fn auc_drop(&self) -> f64 {
        self.full_auc - self.ablated_auc
    }
}

/// Partitions shared by every family of a study.
struct Layout {
    train: Partition,
    test: Partition,
    folds: Vec<Fold>,
}

fn layout(dataset: &Dataset, config: &StudyConfig) -> Result<Layout, ModelError> {
    let partitioner = Partitioner::new(config.seed);
    let (train, test) =
        partitioner.train_test_split(dataset, &dataset.full_partition(), config.train_fraction)?;
    let folds = partitioner.stratified_folds(dataset, &train, config.n_folds)?;
    Ok(Layout { train, test, folds })
}

fn tune_family(
    dataset: &Dataset,
    config: &StudyConfig,
    recipe: &Recipe,
    layout: &Layout,
    family: ModelFamily,
) -> Result<TuningResult, ModelError> {
    ModelTrainer::new(
        recipe,
        dataset,
        &layout.train,
        &layout.folds,
        config.seed,
        config.max_failed_folds,
    )
    .tune(config.search_space(family))
}

pub struct Study;

impl Study {
    pub fn run(dataset: &Dataset, config: &StudyConfig) -> Result<StudyOutcome, ModelError> {
        config.validate()?;
        dataset.log_input_data_summary();
        let layout = layout(dataset, config)?;
        let recipe = Recipe::new(config.recipe.clone());
        let test_labels = layout.test.labels(dataset);
        let mut diagnostics = RunDiagnostics::default();

        let mut tuned = Vec::with_capacity(config.families.len());
        for &family in &config.families {
            let result = tune_family(dataset, config, &recipe, &layout, family)?;
            diagnostics.absorb(&result.diagnostics);
            let point = youden_threshold(&result.out_of_fold_scores, &result.out_of_fold_labels)?;
            log::info!(
                "{}: operating threshold {:.4} from out-of-fold predictions",
                family,
                point.threshold
            );
            tuned.push((result, point));
        }

        let mut evaluations = Vec::with_capacity(tuned.len());
        let mut test_predictions = Vec::with_capacity(tuned.len());
        for (result, point) in &tuned {
            let scores = result.workflow.predict_partition(dataset, &layout.test)?;
            let evaluation = evaluate(
                result.family,
                &scores,
                &test_labels,
                point.threshold,
                &config.evaluation,
                derive_seed(config.seed, Stream::Bootstrap, result.family.index()),
            )?;
            log::info!(
                "{}: test AUC {:.3} [{:.3}, {:.3}]",
                result.family,
                evaluation.auc.value.unwrap_or(f64::NAN),
                evaluation.auc.lower.unwrap_or(f64::NAN),
                evaluation.auc.upper.unwrap_or(f64::NAN)
            );
            diagnostics.failed_bootstrap_iterations += evaluation.failed_bootstrap_iterations();
            diagnostics.clipped_probabilities += evaluation.clipped_probabilities;
            evaluations.push(evaluation);
            test_predictions.push((result.family, scores));
        }
        let comparisons = compare_pairwise(&test_predictions, &test_labels, config.evaluation.alpha)?;

        let explanation = &config.explanation;
        let background =
            background_sample(dataset, &layout.train, explanation.background_size, config.seed)?;
        let mut explained = layout.test.records(dataset);
        if let Some(cap) = explanation.max_explained_patients {
            explained.truncate(cap);
        }
        let importance = tuned
            .iter()
            .map(|(result, _)| {
                global_importance(
                    &result.workflow,
                    &explained,
                    &background,
                    &explanation.shapley,
                    derive_seed(config.seed, Stream::Shapley, result.family.index()),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut consensus = consensus_ranking(&importance, explanation.top_k)?;

        let stability_model = tuned
            .iter()
            .find(|(r, _)| r.family == ModelFamily::BaggedTrees)
            .map(|(r, _)| r.workflow.model_type().clone())
            .unwrap_or_else(|| config.bagged_trees.base.clone());
        let stability = bootstrap_stability(
            &recipe,
            &stability_model,
            dataset,
            &layout.train,
            explanation.stability_resamples,
            explanation.stability_top_n,
            config.seed,
        )?;
        let retained_attributes = consensus.apply_retention(
            &stability,
            explanation.max_consensus_rank,
            explanation.min_stability,
        );
        diagnostics.dropped_degenerate_columns += tuned
            .iter()
            .map(|(r, _)| r.workflow.recipe().dropped().degenerate.len())
            .sum::<usize>();

        let mut tuning = Vec::with_capacity(tuned.len());
        let mut bundles = Vec::with_capacity(tuned.len());
        for (result, point) in tuned {
            tuning.push(TuningSummary {
                family: result.family,
                strategy: result.strategy,
                best: result.best,
                candidates: result.candidates,
                operating_point: point,
            });
            bundles.push(ModelBundle::new(
                result.workflow,
                point.threshold,
                background.clone(),
                explanation.shapley.clone(),
                derive_seed(config.seed, Stream::Shapley, u64::MAX),
            ));
        }

        let report = StudyReport {
            seed: config.seed,
            n_patients: dataset.len(),
            n_train: layout.train.len(),
            n_test: layout.test.len(),
            prevalence_train: layout.train.prevalence(dataset),
            prevalence_test: layout.test.prevalence(dataset),
            tuning,
            evaluations,
            comparisons,
            importance,
            consensus,
            stability,
            retained_attributes,
            diagnostics,
        };
        log::info!("Study finished: {:?}", report.diagnostics);
        Ok(StudyOutcome { bundles, report })
    }

    /// Retrain `family` without `attribute` on the same split and folds and
    /// compare test AUCs with the full recipe.
    pub fn ablation(
        dataset: &Dataset,
        config: &StudyConfig,
        family: ModelFamily,
        attribute: &str,
    ) -> Result<AblationResult, ModelError> {
        config.validate()?;
        dataset.schema().require(attribute)?;
        let layout = layout(dataset, config)?;
        let test_labels = layout.test.labels(dataset);

        let test_auc = |recipe: &Recipe| -> Result<f64, ModelError> {
            let result = tune_family(dataset, config, recipe, &layout, family)?;
            let scores = result.workflow.predict_partition(dataset, &layout.test)?;
            roc_auc(&scores, &test_labels).ok_or_else(|| ModelError::InsufficientSamples {
                class: true,
                count: 0,
                required: 1,
            })
        };
        let full_auc = test_auc(&Recipe::new(config.recipe.clone()))?;
        let ablated_auc = test_auc(&Recipe::new(config.recipe.excluding(attribute)))?;
        log::info!(
            "{} without '{}': test AUC {:.3} -> {:.3}",
            family,
            attribute,
            full_auc,
            ablated_auc
        );
        Ok(AblationResult {
            family,
            attribute: attribute.to_string(),
            full_auc,
            ablated_auc,
        })
    }
}
