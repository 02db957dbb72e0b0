//! Permutation-sampling Shapley values over raw clinical attributes.
//!
//! Attributes are switched from a background patient to the explained
//! patient one at a time, in a random order, and each switch is credited
//! with the change in predicted probability. Because attributes are switched
//! before the recipe runs, one-hot and derived columns are attributed to the
//! raw attribute they came from.
//!
//! For every sampled permutation the credits telescope from the background
//! prediction to the patient prediction, so
//! `baseline + sum(contributions) == prediction` holds up to rounding.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data_handling::PatientRecord;
use crate::error::ModelError;
use crate::rng::{task_rng, Stream};
use crate::workflow::Workflow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapleySettings {
    /// Sampled (permutation, background patient) pairs per explanation.
    pub permutations: usize,
}

impl Default for ShapleySettings {
    fn default() -> Self {
        ShapleySettings { permutations: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub attribute: String,
    pub contribution: f64,
}

/// Additive explanation of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionSet {
    pub prediction: f64,
    /// Mean prediction over the background patients that were sampled.
    pub baseline: f64,
    /// One entry per attribute used by the workflow, in schema order.
    pub contributions: Vec<Attribution>,
}

impl AttributionSet {
    pub fn get(&self, attribute: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|a| a.attribute == attribute)
            .map(|a| a.contribution)
    }

    pub fn total(&self) -> f64 {
        self.contributions.iter().map(|a| a.contribution).sum()
    }

    /// `prediction - baseline - total()`; zero up to rounding.
    pub fn additivity_gap(&self) -> f64 {
        self.prediction - self.baseline - self.total()
    }
}

/// Explain `workflow`'s prediction for `record` against `background`.
///
/// Sample `b` uses `task_rng(seed, Shapley, b)`, so repeated calls with the
/// same seed return identical attributions.
pub fn permutation_shapley(
    workflow: &Workflow,
    record: &PatientRecord,
    background: &[PatientRecord],
    settings: &ShapleySettings,
    seed: u64,
) -> Result<AttributionSet, ModelError> {
    let schema = workflow.schema();
    schema.validate_record(record)?;
    if background.is_empty() {
        return Err(ModelError::InsufficientSamples {
            class: false,
            count: 0,
            required: 1,
        });
    }
    if settings.permutations == 0 {
        return Err(ModelError::config("shapley.permutations must be positive"));
    }
    let attributes = workflow.recipe().kept_attributes().to_vec();
    let p = attributes.len();

    // Every chain holds p + 1 hybrid records: background, then one more
    // attribute taken from `record` at each step.
    let mut orders = Vec::with_capacity(settings.permutations);
    let mut hybrids = Vec::with_capacity(settings.permutations * (p + 1));
    for b in 0..settings.permutations {
        let mut rng = task_rng(seed, Stream::Shapley, b as u64);
        let mut order = attributes.clone();
        order.shuffle(&mut rng);
        let donor = &background[rng.gen_range(0..background.len())];

        let mut current = donor.clone();
        hybrids.push(current.clone());
        for &a in &order {
            current = current.with_value(a, record.get(a));
            hybrids.push(current.clone());
        }
        orders.push(order);
    }

    let predictions = workflow.predict_records(&hybrids)?;
    let mut totals = vec![0.0; schema.len()];
    let mut baseline = 0.0;
    let mut endpoint = 0.0;
    for (b, order) in orders.iter().enumerate() {
        let chain = &predictions[b * (p + 1)..(b + 1) * (p + 1)];
        baseline += chain[0];
        endpoint += chain[p];
        for (step, &a) in order.iter().enumerate() {
            totals[a] += chain[step + 1] - chain[step];
        }
    }
    let n = settings.permutations as f64;
    baseline /= n;
    // The chain endpoint agrees with `record` on every attribute the recipe
    // reads, so it is the patient's prediction.
    let prediction = endpoint / n;

    let contributions = attributes
        .iter()
        .map(|&a| Attribution {
            attribute: schema.attributes()[a].name.clone(),
            contribution: totals[a] / n,
        })
        .collect();
    Ok(AttributionSet {
        prediction,
        baseline,
        contributions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelFamily, ModelType};
    use crate::preprocessing::{Recipe, RecipeOptions};
    use crate::synthetic::simulate_cohort;

    #[test]
    fn contributions_sum_to_prediction_minus_baseline() {
        let ds = simulate_cohort(300, 31);
        let wf = Workflow::fit(
            &Recipe::new(RecipeOptions::default()),
            &ModelType::default_for(ModelFamily::BoostedTrees)
                .with_hyperparameter("num_boost_round", 30.0)
                .unwrap(),
            &ds,
            &ds.full_partition(),
            2,
        )
        .unwrap();
        let background = ds.records()[..20].to_vec();
        let settings = ShapleySettings { permutations: 40 };
        let record = ds.record(100);

        let set = permutation_shapley(&wf, record, &background, &settings, 6).unwrap();
        assert_eq!(set.contributions.len(), ds.schema().len());
        assert!(set.additivity_gap().abs() < 1e-9, "gap {}", set.additivity_gap());
        assert!((set.prediction - wf.predict(record).unwrap()).abs() < 1e-9);

        let again = permutation_shapley(&wf, record, &background, &settings, 6).unwrap();
        assert_eq!(set, again);
    }

    #[test]
    fn excluded_attributes_are_not_reported() {
        let ds = simulate_cohort(200, 8);
        let wf = Workflow::fit(
            &Recipe::new(RecipeOptions::default().excluding("headache")),
            &ModelType::BaggedTrees {
                n_trees: 15,
                mtry: 3,
                min_samples_leaf: 5,
                max_depth: Some(5),
            },
            &ds,
            &ds.full_partition(),
            2,
        )
        .unwrap();
        let set = permutation_shapley(
            &wf,
            ds.record(0),
            &ds.records()[..10],
            &ShapleySettings { permutations: 10 },
            1,
        )
        .unwrap();
        assert_eq!(set.get("headache"), None);
        assert!(set.get("severity").is_some());
    }
}
