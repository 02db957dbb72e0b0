use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::ModelType;
use crate::error::ModelError;
use crate::models::classifier_trait::ClassifierModel;
use crate::models::forest::BaggedTreeClassifier;
use crate::models::gbdt::GBDTClassifier;
use crate::models::svm::SVMClassifier;

/// A fitted-or-unfitted estimator of any supported family.
///
/// Closed over the three families so fitted workflows can be serialized.
#[derive(Serialize, Deserialize)]
pub enum Estimator {
    BaggedTrees(BaggedTreeClassifier),
    BoostedTrees(GBDTClassifier),
    KernelMachine(SVMClassifier),
}

impl Estimator {
    fn inner(&self) -> &dyn ClassifierModel {
        match self {
            Estimator::BaggedTrees(m) => m,
            Estimator::BoostedTrees(m) => m,
            Estimator::KernelMachine(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ClassifierModel {
        match self {
            Estimator::BaggedTrees(m) => m,
            Estimator::BoostedTrees(m) => m,
            Estimator::KernelMachine(m) => m,
        }
    }

    /// Impurity importances per design column, for tree ensembles only.
    pub fn feature_importances(&self) -> Option<&[f64]> {
        match self {
            Estimator::BaggedTrees(m) => Some(m.feature_importances()),
            _ => None,
        }
    }
}

impl ClassifierModel for Estimator {
    fn fit(&mut self, x: &Array2<f64>, y: &[bool]) -> Result<(), ModelError> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
        self.inner().predict_proba(x)
    }

    fn name(&self) -> &str {
        self.inner().name()
    }
}

/// Build an unfitted estimator from its hyperparameters.
///
/// `seed` feeds the estimators that sample internally (bagging).
pub fn build_model(model_type: &ModelType, seed: u64) -> Estimator {
    match model_type {
        ModelType::BaggedTrees {
            n_trees,
            mtry,
            min_samples_leaf,
            max_depth,
        } => Estimator::BaggedTrees(BaggedTreeClassifier::new(
            *n_trees,
            *mtry,
            *min_samples_leaf,
            *max_depth,
            seed,
        )),
        ModelType::GBDT { .. } => Estimator::BoostedTrees(GBDTClassifier::new(model_type.clone())),
        ModelType::SVM { .. } => Estimator::KernelMachine(SVMClassifier::new(model_type.clone())),
    }
}
