//! A fitted recipe paired with a fitted estimator, and the persisted bundle
//! used to score new patients.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ModelFamily, ModelType};
use crate::data_handling::{Dataset, Partition, PatientRecord, Schema};
use crate::error::ModelError;
use crate::explain::shapley::{permutation_shapley, AttributionSet, ShapleySettings};
use crate::models::classifier_trait::ClassifierModel;
use crate::models::factory::{build_model, Estimator};
use crate::preprocessing::{FittedRecipe, Recipe};
use crate::rng::{derive_seed, Stream};

#[derive(Serialize, Deserialize)]
pub struct Workflow {
    model_type: ModelType,
    recipe: FittedRecipe,
    estimator: Estimator,
}

impl Workflow {
    /// Fit `recipe` on `partition`, then fit a `model_type` estimator on the
    /// resulting (possibly oversampled) training matrix.
    pub fn fit(
        recipe: &Recipe,
        model_type: &ModelType,
        dataset: &Dataset,
        partition: &Partition,
        seed: u64,
    ) -> Result<Self, ModelError> {
        let (fitted, training) = recipe.fit(dataset, partition, seed)?;
        let mut estimator = build_model(model_type, derive_seed(seed, Stream::Estimator, 0));
        estimator.fit(&training.x, &training.y)?;
        Ok(Workflow {
            model_type: model_type.clone(),
            recipe: fitted,
            estimator,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.model_type.family()
    }

    pub fn model_type(&self) -> &ModelType {
        &self.model_type
    }

    pub fn recipe(&self) -> &FittedRecipe {
        &self.recipe
    }

    pub fn schema(&self) -> &Schema {
        self.recipe.schema()
    }

    /// Probability of death for each record, in input order.
    pub fn predict_records(&self, records: &[PatientRecord]) -> Result<Vec<f64>, ModelError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let design = self.recipe.apply_records(records)?;
        self.estimator.predict_proba(&design.x)
    }

    pub fn predict(&self, record: &PatientRecord) -> Result<f64, ModelError> {
        let p = self.predict_records(std::slice::from_ref(record))?;
        p.first()
            .copied()
            .ok_or_else(|| ModelError::non_convergence(self.estimator.name(), "empty prediction"))
    }

    pub fn predict_partition(
        &self,
        dataset: &Dataset,
        partition: &Partition,
    ) -> Result<Vec<f64>, ModelError> {
        let design = self.recipe.apply(dataset, partition)?;
        self.estimator.predict_proba(&design.x)
    }

    /// Impurity importances summed back onto raw attributes, in schema order.
    ///
    /// A derived column shares its importance equally between its sources.
    /// `None` for estimators without built-in importances.
    pub fn attribute_importances(&self) -> Option<Vec<f64>> {
        let design = self.estimator.feature_importances()?;
        let mut per_attribute = vec![0.0; self.schema().len()];
        for (value, parents) in design.iter().zip(self.recipe.feature_parents()) {
            if parents.is_empty() {
                continue;
            }
            let share = value / parents.len() as f64;
            for &p in parents {
                per_attribute[p] += share;
            }
        }
        Some(per_attribute)
    }

    /// Shapley attributions of `record` against `background`.
    pub fn explain(
        &self,
        record: &PatientRecord,
        background: &[PatientRecord],
        settings: &ShapleySettings,
        seed: u64,
    ) -> Result<AttributionSet, ModelError> {
        permutation_shapley(self, record, background, settings, seed)
    }
}

/// Everything needed to score and explain a new patient.
#[derive(Serialize, Deserialize)]
pub struct ModelBundle {
    workflow: Workflow,
    threshold: f64,
    background: Vec<PatientRecord>,
    shapley: ShapleySettings,
    seed: u64,
    trained_at: DateTime<Utc>,
}

impl ModelBundle {
    pub fn new(
        workflow: Workflow,
        threshold: f64,
        background: Vec<PatientRecord>,
        shapley: ShapleySettings,
        seed: u64,
    ) -> Self {
        ModelBundle {
            workflow,
            threshold,
            background,
            shapley,
            seed,
            trained_at: Utc::now(),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.workflow.family()
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn background(&self) -> &[PatientRecord] {
        &self.background
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn schema(&self) -> &Schema {
        self.workflow.schema()
    }

    pub fn predict(&self, record: &PatientRecord) -> Result<f64, ModelError> {
        self.workflow.predict(record)
    }

    /// `true` when the predicted probability reaches the operating threshold.
    pub fn classify(&self, record: &PatientRecord) -> Result<bool, ModelError> {
        Ok(self.predict(record)? >= self.threshold)
    }

    pub fn explain(&self, record: &PatientRecord) -> Result<AttributionSet, ModelError> {
        self.workflow
            .explain(record, &self.background, &self.shapley, self.seed)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a bundle, refusing it when its schema differs from `expected`.
    pub fn from_json(json: &str, expected: &Schema) -> Result<Self, ModelError> {
        let bundle: ModelBundle = serde_json::from_str(json)?;
        if bundle.schema() != expected {
            return Err(ModelError::schema(format!(
                "bundle was trained on attributes [{}] but the current schema has [{}]",
                bundle.schema().names().join(", "),
                expected.names().join(", ")
            )));
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::Attribute;
    use crate::preprocessing::RecipeOptions;
    use crate::synthetic::simulate_cohort;

    fn small_forest() -> ModelType {
        ModelType::BaggedTrees {
            n_trees: 20,
            mtry: 3,
            min_samples_leaf: 5,
            max_depth: Some(6),
        }
    }

    #[test]
    fn bundle_round_trips_and_rejects_schema_drift() {
        let ds = simulate_cohort(300, 17);
        let wf = Workflow::fit(
            &Recipe::new(RecipeOptions::default()),
            &small_forest(),
            &ds,
            &ds.full_partition(),
            5,
        )
        .unwrap();
        let record = ds.record(0).clone();
        let before = wf.predict(&record).unwrap();

        let bundle = ModelBundle::new(wf, 0.3, ds.records()[..10].to_vec(), ShapleySettings::default(), 1);
        let json = bundle.to_json().unwrap();
        let restored = ModelBundle::from_json(&json, &Schema::clinical()).unwrap();
        assert_eq!(restored.predict(&record).unwrap(), before);
        assert_eq!(restored.classify(&record).unwrap(), before >= 0.3);

        let mut attrs = Schema::clinical().attributes().to_vec();
        attrs.push(Attribute::numeric("lactate"));
        let drifted = Schema::new(attrs).unwrap();
        assert!(matches!(
            ModelBundle::from_json(&json, &drifted),
            Err(ModelError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn importances_fold_back_to_attributes() {
        let ds = simulate_cohort(300, 23);
        let wf = Workflow::fit(
            &Recipe::new(RecipeOptions::default()),
            &small_forest(),
            &ds,
            &ds.full_partition(),
            8,
        )
        .unwrap();
        let imp = wf.attribute_importances().unwrap();
        assert_eq!(imp.len(), ds.schema().len());
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
