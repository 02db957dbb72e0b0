use ndarray::Array2;

use crate::error::ModelError;

/// Contract shared by every estimator family.
///
/// `x` is a design matrix produced by a fitted recipe (rows are patients),
/// `y` is `true` for in-hospital death.
pub trait ClassifierModel {
    /// Fit the model on a (possibly oversampled) training matrix.
    fn fit(&mut self, x: &Array2<f64>, y: &[bool]) -> Result<(), ModelError>;

    /// Probability of the positive class for every row, each in `[0, 1]`.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError>;

    /// Optional human readable name for the model
    fn name(&self) -> &str {
        "classifier"
    }
}

/// Shared input validation for `fit`.
pub(crate) fn check_training_input(
    model: &str,
    x: &Array2<f64>,
    y: &[bool],
) -> Result<(), ModelError> {
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            expected: x.nrows(),
            got: y.len(),
        });
    }
    if x.ncols() == 0 || x.nrows() == 0 {
        return Err(ModelError::non_convergence(model, "empty training matrix"));
    }
    if y.iter().all(|&v| v) || y.iter().all(|&v| !v) {
        return Err(ModelError::non_convergence(
            model,
            "training labels contain a single class",
        ));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::non_convergence(
            model,
            "training matrix contains non-finite values",
        ));
    }
    Ok(())
}

/// Convert raw model outputs into checked probabilities.
pub(crate) fn checked_probabilities(
    model: &str,
    raw: impl IntoIterator<Item = f64>,
) -> Result<Vec<f64>, ModelError> {
    raw.into_iter()
        .map(|p| {
            if p.is_finite() {
                Ok(p.clamp(0.0, 1.0))
            } else {
                Err(ModelError::non_convergence(model, "non-finite prediction"))
            }
        })
        .collect()
}
