//! Deterministic features computed from raw attributes.
use serde::{Deserialize, Serialize};

/// Smallest denominator admitted by a ratio feature.
const RATIO_FLOOR: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedFeature {
    /// `numerator / denominator`, denominator floored at a small positive value.
    Ratio {
        name: String,
        numerator: String,
        denominator: String,
    },
    /// `ln(1 + x)` for a non-negative count-like attribute.
    LogCount { name: String, attribute: String },
}

impl DerivedFeature {
    pub fn name(&self) -> &str {
        match self {
            DerivedFeature::Ratio { name, .. } | DerivedFeature::LogCount { name, .. } => name,
        }
    }

    pub fn sources(&self) -> Vec<&str> {
        match self {
            DerivedFeature::Ratio {
                numerator,
                denominator,
                ..
            } => vec![numerator, denominator],
            DerivedFeature::LogCount { attribute, .. } => vec![attribute],
        }
    }

    /// Evaluate on source values given in `sources()` order.
    pub fn evaluate(&self, inputs: &[f64]) -> f64 {
        match self {
            DerivedFeature::Ratio { .. } => inputs[0] / inputs[1].max(RATIO_FLOOR),
            DerivedFeature::LogCount { .. } => inputs[0].max(0.0).ln_1p(),
        }
    }
}

/// Albumin-to-bilirubin ratio and log platelet count.
pub fn clinical_defaults() -> Vec<DerivedFeature> {
    vec![
        DerivedFeature::Ratio {
            name: "albumin_bilirubin_ratio".to_string(),
            numerator: "albumin".to_string(),
            denominator: "bilirubin".to_string(),
        },
        DerivedFeature::LogCount {
            name: "log_platelets".to_string(),
            attribute: "platelets".to_string(),
        },
    ]
}
