use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::explain::ExplanationSettings;
use crate::preprocessing::RecipeOptions;
use crate::stats::compare::EvaluationSettings;
use crate::tuning::SearchSpace;

/// The three algorithm families compared in a study.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    BaggedTrees,
    BoostedTrees,
    KernelMachine,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [
        ModelFamily::BaggedTrees,
        ModelFamily::BoostedTrees,
        ModelFamily::KernelMachine,
    ];

    /// Stable position used when deriving per-family seeds.
    pub fn index(&self) -> u64 {
        match self {
            ModelFamily::BaggedTrees => 0,
            ModelFamily::BoostedTrees => 1,
            ModelFamily::KernelMachine => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::BaggedTrees => "bagged_trees",
            ModelFamily::BoostedTrees => "boosted_trees",
            ModelFamily::KernelMachine => "kernel_machine",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported model types and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ModelType {
    BaggedTrees {
        n_trees: usize,
        mtry: usize,
        min_samples_leaf: usize,
        max_depth: Option<usize>,
    },
    GBDT {
        max_depth: u32,
        num_boost_round: u32,
        learning_rate: f32,
        debug: bool,
        training_optimization_level: u8,
        loss_type: String,
    },
    SVM {
        eps: f64,
        c: (f64, f64),
        gaussian_kernel_eps: f64,
    },
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::default_for(ModelFamily::BaggedTrees)
    }
}

impl ModelType {
    /// Starting hyperparameters for `family`; search dimensions override them.
    pub fn default_for(family: ModelFamily) -> Self {
        match family {
            ModelFamily::BaggedTrees => ModelType::BaggedTrees {
                n_trees: 200,
                mtry: 3,
                min_samples_leaf: 5,
                max_depth: None,
            },
            ModelFamily::BoostedTrees => ModelType::GBDT {
                max_depth: 3,
                num_boost_round: 100,
                learning_rate: 0.1,
                debug: false,
                training_optimization_level: 2,
                loss_type: "LogLikelyhood".to_string(),
            },
            ModelFamily::KernelMachine => ModelType::SVM {
                eps: 1e-3,
                c: (1.0, 1.0),
                gaussian_kernel_eps: 10.0,
            },
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            ModelType::BaggedTrees { .. } => ModelFamily::BaggedTrees,
            ModelType::GBDT { .. } => ModelFamily::BoostedTrees,
            ModelType::SVM { .. } => ModelFamily::KernelMachine,
        }
    }

    /// Return a copy with the named hyperparameter set to `value`.
    ///
    /// Integer hyperparameters are rounded to the nearest admissible value.
    pub fn with_hyperparameter(&self, name: &str, value: f64) -> Result<Self, ModelError> {
        if !value.is_finite() {
            return Err(ModelError::config(format!("{} must be finite", name)));
        }
        let count = |v: f64| v.round().max(1.0) as usize;
        let mut updated = self.clone();
        match (&mut updated, name) {
            (ModelType::BaggedTrees { n_trees, .. }, "n_trees") => *n_trees = count(value),
            (ModelType::BaggedTrees { mtry, .. }, "mtry") => *mtry = count(value),
            (ModelType::BaggedTrees { min_samples_leaf, .. }, "min_samples_leaf") => {
                *min_samples_leaf = count(value)
            }
            (ModelType::BaggedTrees { max_depth, .. }, "max_depth") => {
                *max_depth = Some(count(value))
            }
            (ModelType::GBDT { max_depth, .. }, "max_depth") => *max_depth = count(value) as u32,
            (ModelType::GBDT { num_boost_round, .. }, "num_boost_round") => {
                *num_boost_round = count(value) as u32
            }
            (ModelType::GBDT { learning_rate, .. }, "learning_rate") => {
                *learning_rate = value as f32
            }
            (ModelType::SVM { c, .. }, "c") => *c = (value, value),
            (ModelType::SVM { gaussian_kernel_eps, .. }, "gaussian_kernel_eps") => {
                *gaussian_kernel_eps = value
            }
            (ModelType::SVM { eps, .. }, "eps") => *eps = value,
            _ => {
                return Err(ModelError::config(format!(
                    "{} has no hyperparameter '{}'",
                    self.family(),
                    name
                )))
            }
        }
        Ok(updated)
    }

    /// Compact `name=value` listing for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            ModelType::BaggedTrees {
                n_trees,
                mtry,
                min_samples_leaf,
                max_depth,
            } => format!(
                "n_trees={}, mtry={}, min_samples_leaf={}, max_depth={}",
                n_trees,
                mtry,
                min_samples_leaf,
                max_depth.map_or("none".to_string(), |d| d.to_string())
            ),
            ModelType::GBDT {
                max_depth,
                num_boost_round,
                learning_rate,
                ..
            } => format!(
                "max_depth={}, num_boost_round={}, learning_rate={:.4}",
                max_depth, num_boost_round, learning_rate
            ),
            ModelType::SVM {
                c,
                gaussian_kernel_eps,
                ..
            } => format!("c={:.4}, gaussian_kernel_eps={:.4}", c.0, gaussian_kernel_eps),
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bagged_trees" | "random_forest" | "rf" => {
                Ok(ModelType::default_for(ModelFamily::BaggedTrees))
            }
            "boosted_trees" | "gbdt" => Ok(ModelType::default_for(ModelFamily::BoostedTrees)),
            "kernel_machine" | "svm" => Ok(ModelType::default_for(ModelFamily::KernelMachine)),
            _ => Err(format!(
                "Unknown model type: {}. Valid options are: bagged_trees, boosted_trees, kernel_machine",
                s
            )),
        }
    }
}

/// Everything a study run needs besides the data.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct StudyConfig {
    pub seed: u64,
    pub train_fraction: f64,
    pub n_folds: usize,
    /// Failed folds tolerated per configuration before it is abandoned.
    pub max_failed_folds: usize,
    pub families: Vec<ModelFamily>,
    pub recipe: RecipeOptions,
    pub bagged_trees: SearchSpace,
    pub boosted_trees: SearchSpace,
    pub kernel_machine: SearchSpace,
    pub evaluation: EvaluationSettings,
    pub explanation: ExplanationSettings,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            seed: 2024,
            train_fraction: 0.8,
            n_folds: 5,
            max_failed_folds: 0,
            families: ModelFamily::ALL.to_vec(),
            recipe: RecipeOptions::default(),
            bagged_trees: SearchSpace::default_for(ModelFamily::BaggedTrees),
            boosted_trees: SearchSpace::default_for(ModelFamily::BoostedTrees),
            kernel_machine: SearchSpace::default_for(ModelFamily::KernelMachine),
            evaluation: EvaluationSettings::default(),
            explanation: ExplanationSettings::default(),
        }
    }
}

impl StudyConfig {
    pub fn search_space(&self, family: ModelFamily) -> &SearchSpace {
        match family {
            ModelFamily::BaggedTrees => &self.bagged_trees,
            ModelFamily::BoostedTrees => &self.boosted_trees,
            ModelFamily::KernelMachine => &self.kernel_machine,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.families.is_empty() {
            return Err(ModelError::config("at least one model family is required"));
        }
        if self.n_folds < 2 {
            return Err(ModelError::config("n_folds must be at least 2"));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(ModelError::config("train_fraction must be in (0, 1)"));
        }
        for family in &self.families {
            let space = self.search_space(*family);
            if space.base.family() != *family {
                return Err(ModelError::config(format!(
                    "search space for {} starts from a {} model",
                    family,
                    space.base.family()
                )));
            }
        }
        self.evaluation.validate()?;
        self.explanation.validate()
    }
}

/// Load a study configuration from a JSON file.
pub fn load_study_config<P: AsRef<Path>>(path: P) -> anyhow::Result<StudyConfig> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
    let config: StudyConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config: {}", path.as_ref().display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyperparameters_are_applied_by_name() {
        let base = ModelType::default_for(ModelFamily::BaggedTrees);
        let tuned = base.with_hyperparameter("mtry", 4.4).unwrap();
        assert!(matches!(tuned, ModelType::BaggedTrees { mtry: 4, .. }));

        let svm = ModelType::default_for(ModelFamily::KernelMachine)
            .with_hyperparameter("c", 2.5)
            .unwrap();
        assert!(matches!(svm, ModelType::SVM { c, .. } if c == (2.5, 2.5)));

        assert!(base.with_hyperparameter("learning_rate", 0.1).is_err());
    }

    #[test]
    fn model_type_from_str() {
        assert_eq!(
            ModelType::from_str("GBDT").unwrap().family(),
            ModelFamily::BoostedTrees
        );
        assert!(ModelType::from_str("xgboost").is_err());
    }

    #[test]
    fn default_config_validates() {
        StudyConfig::default().validate().unwrap();
    }

    #[test]
    fn config_survives_json_and_fills_defaults() {
        let mut config = StudyConfig::default();
        config.seed = 9;
        config.families = vec![ModelFamily::KernelMachine];
        let json = serde_json::to_string(&config).unwrap();
        let back: StudyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seed, 9);
        assert_eq!(back.families, vec![ModelFamily::KernelMachine]);
        assert_eq!(back.kernel_machine, config.kernel_machine);

        let partial: StudyConfig =
            serde_json::from_str(r#"{"n_folds": 3, "families": ["bagged_trees"]}"#).unwrap();
        assert_eq!(partial.n_folds, 3);
        assert_eq!(partial.train_fraction, 0.8);
        partial.validate().unwrap();
    }
}
