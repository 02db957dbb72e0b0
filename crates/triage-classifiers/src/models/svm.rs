use linfa::dataset::Pr;
use linfa::traits::{Fit, Predict};
use linfa::{Dataset, DatasetBase};
use linfa_svm::{Svm, SvmError, SvmParams};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::ModelType;
use crate::error::ModelError;
use crate::models::classifier_trait::{check_training_input, checked_probabilities, ClassifierModel};

/// Gaussian-kernel support vector machine with Platt-scaled probabilities.
#[derive(Serialize, Deserialize)]
pub struct SVMClassifier {
    model: Option<Svm<f64, Pr>>,
    params: ModelType,
}

impl SVMClassifier {
    pub fn new(params: ModelType) -> Self {
        SVMClassifier {
            model: None,
            params,
        }
    }
}

impl ClassifierModel for SVMClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[bool]) -> Result<(), ModelError> {
        check_training_input(self.name(), x, y)?;

        let ModelType::SVM {
            eps,
            c,
            gaussian_kernel_eps,
        } = &self.params
        else {
            return Err(ModelError::config(format!(
                "Expected ModelType::SVM but got {:?}",
                self.params
            )));
        };
        let (c1, c2) = *c;
        if !(c1 > 0.0 && c2 > 0.0 && *gaussian_kernel_eps > 0.0 && *eps > 0.0) {
            return Err(ModelError::config(format!(
                "invalid kernel machine parameters: {}",
                self.params.describe()
            )));
        }

        let dataset = Dataset::new(x.to_owned(), Array1::from_vec(y.to_vec()));
        let params: SvmParams<f64, Pr> = Svm::<f64, Pr>::params()
            .eps(*eps)
            .pos_neg_weights(c1, c2)
            .gaussian_kernel(*gaussian_kernel_eps);

        let fitted: Result<Svm<f64, Pr>, SvmError> =
            <SvmParams<f64, Pr> as Fit<_, _, _>>::fit(&params, &dataset);
        let model =
            fitted.map_err(|e| ModelError::non_convergence(self.name(), e.to_string()))?;
        self.model = Some(model);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ModelError::non_convergence(self.name(), "model is not fitted"))?;
        let predictions: DatasetBase<Array2<f64>, Array1<Pr>> = model.predict(x.to_owned());
        checked_probabilities(
            self.name(),
            predictions.targets().iter().map(|&p| f64::from(*p)),
        )
    }

    fn name(&self) -> &str {
        "kernel_machine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelFamily;

    #[test]
    fn test_svm_classifier() {
        let x = Array2::from_shape_fn((40, 2), |(r, c)| {
            let side = if r < 20 { -1.0 } else { 1.0 };
            side * 2.0 + if c == 0 { (r % 5) as f64 * 0.1 } else { (r % 3) as f64 * 0.1 }
        });
        let y: Vec<bool> = (0..40).map(|r| r >= 20).collect();

        let params = ModelType::default_for(ModelFamily::KernelMachine);
        let mut classifier = SVMClassifier::new(params);
        classifier.fit(&x, &y).unwrap();

        let predictions = classifier.predict_proba(&x).unwrap();
        assert_eq!(predictions.len(), 40);
        assert!(predictions.iter().all(|p| (0.0..=1.0).contains(p)));
        let low: f64 = predictions[..20].iter().sum::<f64>() / 20.0;
        let high: f64 = predictions[20..].iter().sum::<f64>() / 20.0;
        assert!(high > low);
    }
}
