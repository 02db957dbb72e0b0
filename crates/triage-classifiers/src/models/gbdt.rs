use std::panic::{catch_unwind, AssertUnwindSafe};

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::ModelType;
use crate::error::ModelError;
use crate::models::classifier_trait::{check_training_input, checked_probabilities, ClassifierModel};

/// Gradient Boosting Decision Tree (GBDT) classifier
#[derive(Serialize, Deserialize)]
pub struct GBDTClassifier {
    model: Option<GBDT>,
    params: ModelType,
}

impl GBDTClassifier {
    pub fn new(params: ModelType) -> Self {
        GBDTClassifier {
            model: None,
            params,
        }
    }
}

fn to_data_vec(x: &Array2<f64>, y: Option<&[bool]>) -> DataVec {
    let mut data = DataVec::with_capacity(x.nrows());
    for (i, row) in x.rows().into_iter().enumerate() {
        let features: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        // LogLikelyhood loss expects labels in {-1, 1}.
        let label = match y {
            Some(labels) if labels[i] => 1.0,
            Some(_) => -1.0,
            None => 0.0,
        };
        data.push(Data::new_training_data(features, 1.0, label, None));
    }
    data
}

impl ClassifierModel for GBDTClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[bool]) -> Result<(), ModelError> {
        check_training_input(self.name(), x, y)?;

        let ModelType::GBDT {
            max_depth,
            num_boost_round,
            learning_rate,
            debug,
            training_optimization_level,
            loss_type,
        } = &self.params
        else {
            return Err(ModelError::config(format!(
                "Expected ModelType::GBDT params, got {:?}",
                self.params
            )));
        };
        if *max_depth == 0 || *num_boost_round == 0 || !(*learning_rate > 0.0) {
            return Err(ModelError::config(format!(
                "invalid boosting parameters: {}",
                self.params.describe()
            )));
        }

        let mut config = Config::new();
        config.set_feature_size(x.ncols());
        config.set_shrinkage(*learning_rate);
        config.set_max_depth(*max_depth);
        config.set_iterations(*num_boost_round as usize);
        config.set_debug(*debug);
        config.set_training_optimization_level(*training_optimization_level);
        config.set_loss(loss_type);

        let mut gbdt = GBDT::new(&config);
        let mut train_x = to_data_vec(x, Some(y));

        catch_unwind(AssertUnwindSafe(|| gbdt.fit(&mut train_x))).map_err(|_| {
            ModelError::non_convergence(self.name(), "gradient boosting aborted during fit")
        })?;

        self.model = Some(gbdt);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ModelError::non_convergence(self.name(), "model is not fitted"))?;
        let test_x = to_data_vec(x, None);
        let predictions = catch_unwind(AssertUnwindSafe(|| model.predict(&test_x)))
            .map_err(|_| ModelError::non_convergence(self.name(), "prediction aborted"))?;
        checked_probabilities(self.name(), predictions.into_iter().map(f64::from))
    }

    fn name(&self) -> &str {
        "boosted_trees"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelFamily;

    #[test]
    fn test_gbdt_classifier() {
        let x = Array2::from_shape_fn((40, 3), |(r, c)| match c {
            0 => r as f64 / 10.0,
            1 => ((r * 3) % 7) as f64,
            _ => -(r as f64),
        });
        let y: Vec<bool> = (0..40).map(|r| r >= 20).collect();

        let params = ModelType::default_for(ModelFamily::BoostedTrees)
            .with_hyperparameter("num_boost_round", 20.0)
            .unwrap();
        let mut classifier = GBDTClassifier::new(params);
        classifier.fit(&x, &y).unwrap();

        let predictions = classifier.predict_proba(&x).unwrap();
        assert_eq!(predictions.len(), 40);
        assert!(predictions.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(predictions[35] > predictions[5]);
    }

    #[test]
    fn unfitted_model_reports_error() {
        let classifier = GBDTClassifier::new(ModelType::default_for(ModelFamily::BoostedTrees));
        assert!(classifier.predict_proba(&Array2::zeros((1, 3))).is_err());
    }
}
