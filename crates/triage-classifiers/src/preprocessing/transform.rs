//! Column-wise power transform and standardization.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Search interval for the Yeo-Johnson exponent.
const LAMBDA_LIMITS: (f64, f64) = (-5.0, 5.0);
const GOLDEN_ITERATIONS: usize = 100;

/// Fitted Yeo-Johnson exponent for one column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerTransform {
    pub column: String,
    pub lambda: f64,
}

/// Yeo-Johnson transform of a single value.
pub fn yeo_johnson(x: f64, lambda: f64) -> f64 {
    const EPS: f64 = 1e-10;
    if x >= 0.0 {
        if lambda.abs() < EPS {
            x.ln_1p()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < EPS {
        -(-x).ln_1p()
    } else {
        -((1.0 - x).powf(2.0 - lambda) - 1.0) / (2.0 - lambda)
    }
}

fn log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let n = values.len() as f64;
    let transformed: Vec<f64> = values.iter().map(|&x| yeo_johnson(x, lambda)).collect();
    let mean = transformed.iter().sum::<f64>() / n;
    let var = transformed.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
    if !(var > 0.0) || !var.is_finite() {
        return f64::NEG_INFINITY;
    }
    let jacobian: f64 = values.iter().map(|&x| x.signum() * x.abs().ln_1p()).sum();
    -0.5 * n * var.ln() + (lambda - 1.0) * jacobian
}

impl PowerTransform {
    /// Estimate the exponent maximising the profile log-likelihood.
    ///
    /// A column without variance has no likelihood maximum and is reported
    /// as `DegenerateColumn`.
    pub fn fit(column: &str, values: &[f64]) -> Result<Self, ModelError> {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n.max(1.0);
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n.max(1.0);
        if values.len() < 2 || var < 1e-12 {
            return Err(ModelError::DegenerateColumn {
                column: column.to_string(),
                detail: "constant on the training partition".to_string(),
            });
        }

        let ratio = (5f64.sqrt() - 1.0) / 2.0;
        let (mut lo, mut hi) = LAMBDA_LIMITS;
        let mut a = hi - ratio * (hi - lo);
        let mut b = lo + ratio * (hi - lo);
        let mut fa = log_likelihood(values, a);
        let mut fb = log_likelihood(values, b);
        for _ in 0..GOLDEN_ITERATIONS {
            if fa >= fb {
                hi = b;
                b = a;
                fb = fa;
                a = hi - ratio * (hi - lo);
                fa = log_likelihood(values, a);
            } else {
                lo = a;
                a = b;
                fa = fb;
                b = lo + ratio * (hi - lo);
                fb = log_likelihood(values, b);
            }
        }
        let lambda = 0.5 * (lo + hi);
        if !log_likelihood(values, lambda).is_finite() {
            return Err(ModelError::DegenerateColumn {
                column: column.to_string(),
                detail: "power transform likelihood is not finite".to_string(),
            });
        }
        Ok(PowerTransform {
            column: column.to_string(),
            lambda,
        })
    }

    pub fn apply(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            *v = yeo_johnson(*v, self.lambda);
        }
    }
}

/// Simple standard scaler (per-column mean/std).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Scaler {
    /// Minimum stddev below which a column cannot be standardized.
    pub const MIN_STD: f64 = 1e-8;

    /// Fit mean and sample standard deviation of one column and record it.
    pub fn fit_column(&mut self, column: &str, values: &[f64]) -> Result<(), ModelError> {
        let n = values.len();
        if n < 2 {
            return Err(ModelError::DegenerateColumn {
                column: column.to_string(),
                detail: "fewer than two training values".to_string(),
            });
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        let std = var.sqrt();
        if !(std >= Self::MIN_STD) {
            return Err(ModelError::DegenerateColumn {
                column: column.to_string(),
                detail: "zero standard deviation on the training partition".to_string(),
            });
        }
        self.columns.push(column.to_string());
        self.mean.push(mean);
        self.std.push(std);
        Ok(())
    }

    /// Standardize `values` with the parameters stored for `column`.
    pub fn transform_column(&self, column: &str, values: &mut [f64]) -> bool {
        match self.columns.iter().position(|c| c == column) {
            Some(i) => {
                for v in values.iter_mut() {
                    *v = (*v - self.mean[i]) / self.std[i];
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yeo_johnson_identity_at_one() {
        for x in [-3.0, -0.5, 0.0, 0.7, 12.0] {
            assert!((yeo_johnson(x, 1.0) - x).abs() < 1e-12);
        }
    }

    #[test]
    fn skewed_column_gets_compressing_lambda() {
        let values: Vec<f64> = (1..200).map(|i| (i as f64 / 20.0).exp()).collect();
        let fitted = PowerTransform::fit("skewed", &values).unwrap();
        assert!(fitted.lambda < 1.0, "lambda {}", fitted.lambda);
    }

    #[test]
    fn constant_column_is_degenerate() {
        let err = PowerTransform::fit("flat", &[2.0; 10]);
        assert!(matches!(err, Err(ModelError::DegenerateColumn { .. })));
        let mut scaler = Scaler::default();
        assert!(scaler.fit_column("flat", &[2.0; 10]).is_err());
        assert!(scaler.columns.is_empty());
    }

    #[test]
    fn scaler_standardizes() {
        let mut scaler = Scaler::default();
        let mut values = vec![1.0, 2.0, 3.0, 4.0, 10.0];
        scaler.fit_column("x", &values).unwrap();
        assert!(scaler.transform_column("x", &mut values));
        let mean = values.iter().sum::<f64>() / 5.0;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        assert!((var.sqrt() - 1.0).abs() < 1e-12);
    }
}
