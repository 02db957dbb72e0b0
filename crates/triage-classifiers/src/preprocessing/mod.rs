//! Leakage-safe preprocessing recipe.
//!
//! A `Recipe` is fitted once per training-role partition and yields a
//! `FittedRecipe` whose `apply` is pure: it replays the learned parameters on
//! any partition without looking at that partition's statistics. Steps run in
//! a fixed order:
//!
//! 1. imputation (numeric nearest-neighbour, boolean/categorical mode)
//! 2. derived features
//! 3. correlation pruning
//! 4. near-zero-variance pruning
//! 5. Yeo-Johnson power transform of continuous columns
//! 6. standardization of numeric columns
//! 7. one-hot encoding of categorical columns
//! 8. minority oversampling (training matrix only)
pub mod balance;
pub mod derive;
pub mod encode;
pub mod impute;
pub mod transform;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data_handling::{AttributeKind, Dataset, Partition, PatientRecord, Schema};
use crate::error::ModelError;
use crate::feature_selection::filters::{correlation_filter, NearZeroVariance};
use crate::rng::{task_rng, Stream};

use self::balance::{oversample, OversamplingOptions};
use self::derive::{clinical_defaults, DerivedFeature};
use self::encode::OneHotEncoder;
use self::impute::Imputer;
use self::transform::{PowerTransform, Scaler};

/// Step switches and parameters of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeOptions {
    pub knn_neighbors: usize,
    pub derived_features: Vec<DerivedFeature>,
    /// Absolute correlation above which one column of a pair is dropped.
    pub correlation_threshold: Option<f64>,
    pub near_zero_variance: Option<NearZeroVariance>,
    pub power_transform: bool,
    pub oversampling: Option<OversamplingOptions>,
    /// Raw attributes left out of the design entirely.
    pub exclude: Vec<String>,
}

impl Default for RecipeOptions {
    fn default() -> Self {
        Self {
            knn_neighbors: 5,
            derived_features: clinical_defaults(),
            correlation_threshold: Some(0.9),
            near_zero_variance: Some(NearZeroVariance::default()),
            power_transform: true,
            oversampling: Some(OversamplingOptions::default()),
            exclude: Vec::new(),
        }
    }
}

impl RecipeOptions {
    /// Same options with `attribute` removed from the design.
    pub fn excluding(&self, attribute: &str) -> Self {
        let mut options = self.clone();
        if !options.exclude.iter().any(|a| a == attribute) {
            options.exclude.push(attribute.to_string());
        }
        options
    }
}

/// Column storage while a recipe runs.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ColumnData {
    Continuous(Vec<f64>),
    Binary(Vec<f64>),
    Categorical { codes: Vec<usize>, levels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Column {
    pub name: String,
    /// Schema positions of the raw attributes this column is computed from.
    pub parents: Vec<usize>,
    pub data: ColumnData,
}

impl Column {
    fn numeric_values(&self) -> Option<&[f64]> {
        match &self.data {
            ColumnData::Continuous(v) | ColumnData::Binary(v) => Some(v),
            ColumnData::Categorical { .. } => None,
        }
    }

    fn numeric_values_mut(&mut self) -> Option<&mut Vec<f64>> {
        match &mut self.data {
            ColumnData::Continuous(v) | ColumnData::Binary(v) => Some(v),
            ColumnData::Categorical { .. } => None,
        }
    }

    fn as_codes(&self) -> Vec<f64> {
        match &self.data {
            ColumnData::Continuous(v) | ColumnData::Binary(v) => v.clone(),
            ColumnData::Categorical { codes, .. } => codes.iter().map(|&c| c as f64).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Frame {
    pub columns: Vec<Column>,
}

impl Frame {
    fn drop_named(&mut self, names: &[String]) {
        self.columns.retain(|c| !names.contains(&c.name));
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Names of columns removed while fitting, grouped by the step that removed them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DroppedColumns {
    pub correlated: Vec<String>,
    pub near_zero_variance: Vec<String>,
    pub degenerate: Vec<String>,
}

impl DroppedColumns {
    fn all(&self) -> Vec<String> {
        self.correlated
            .iter()
            .chain(self.near_zero_variance.iter())
            .chain(self.degenerate.iter())
            .cloned()
            .collect()
    }
}

/// Numeric design matrix produced by a fitted recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub x: Array2<f64>,
    pub feature_names: Vec<String>,
}

impl DesignMatrix {
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        self.feature_names
            .iter()
            .position(|n| n == name)
            .map(|c| self.x.column(c).to_vec())
    }
}

/// Training matrix after oversampling, ready for an estimator.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub x: Array2<f64>,
    pub y: Vec<bool>,
    pub n_synthetic: usize,
}

/// Unfitted recipe.
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    options: RecipeOptions,
}

impl Recipe {
    pub fn new(options: RecipeOptions) -> Self {
        Recipe { options }
    }

    pub fn options(&self) -> &RecipeOptions {
        &self.options
    }

    /// Fit every step on `partition` and return the fitted recipe with the
    /// (oversampled) training matrix.
    ///
    /// Only records of `partition` are read. `seed` drives oversampling.
    pub fn fit(
        &self,
        dataset: &Dataset,
        partition: &Partition,
        seed: u64,
    ) -> Result<(FittedRecipe, TrainingSet), ModelError> {
        let schema = dataset.schema();
        if partition.is_empty() {
            return Err(ModelError::InsufficientSamples {
                class: true,
                count: 0,
                required: 1,
            });
        }
        let attributes = self.kept_attributes(schema)?;
        let derived = self.usable_derived(schema, &attributes);

        let records = partition.records(dataset);
        let imputer = Imputer::fit(schema, &attributes, &records, self.options.knn_neighbors);
        let imputed: Vec<PatientRecord> =
            records.iter().map(|r| imputer.apply(schema, r)).collect();
        let mut frame = build_frame(schema, &attributes, &derived, &imputed);

        let mut dropped = DroppedColumns::default();

        if let Some(threshold) = self.options.correlation_threshold {
            let numeric: Vec<(String, &[f64])> = frame
                .columns
                .iter()
                .filter_map(|c| c.numeric_values().map(|v| (c.name.clone(), v)))
                .collect();
            let slices: Vec<&[f64]> = numeric.iter().map(|(_, v)| *v).collect();
            dropped.correlated = correlation_filter(&slices, threshold)
                .into_iter()
                .map(|i| numeric[i].0.clone())
                .collect();
            frame.drop_named(&dropped.correlated);
        }

        if let Some(nzv) = &self.options.near_zero_variance {
            let codes: Vec<Vec<f64>> = frame.columns.iter().map(|c| c.as_codes()).collect();
            let slices: Vec<&[f64]> = codes.iter().map(|v| v.as_slice()).collect();
            dropped.near_zero_variance = nzv
                .filter(&slices)
                .into_iter()
                .map(|i| frame.columns[i].name.clone())
                .collect();
            frame.drop_named(&dropped.near_zero_variance);
        }

        let mut power = Vec::new();
        if self.options.power_transform {
            for col in frame.columns.iter_mut() {
                if let ColumnData::Continuous(values) = &mut col.data {
                    match PowerTransform::fit(&col.name, values) {
                        Ok(fitted) => {
                            fitted.apply(values);
                            power.push(fitted);
                        }
                        Err(ModelError::DegenerateColumn { column, detail }) => {
                            log::warn!("Dropping column '{}': {}", column, detail);
                            dropped.degenerate.push(column);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            frame.drop_named(&dropped.degenerate);
        }

        let mut scaler = Scaler::default();
        let mut unscalable = Vec::new();
        for col in frame.columns.iter_mut() {
            let name = col.name.clone();
            if let Some(values) = col.numeric_values_mut() {
                match scaler.fit_column(&name, values) {
                    Ok(()) => {
                        scaler.transform_column(&name, values);
                    }
                    Err(ModelError::DegenerateColumn { column, detail }) => {
                        log::warn!("Dropping column '{}': {}", column, detail);
                        unscalable.push(column);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        frame.drop_named(&unscalable);
        dropped.degenerate.extend(unscalable);

        let encoder = OneHotEncoder::from_frame(&frame);
        let (x, feature_names, feature_parents) = encoder.encode(&frame)?;
        if feature_names.is_empty() {
            return Err(ModelError::config(
                "recipe removed every column of the design matrix",
            ));
        }

        let labels = partition.labels(dataset);
        let (x_train, y_train, n_synthetic) = match &self.options.oversampling {
            Some(opts) => oversample(
                &x,
                &labels,
                opts,
                &mut task_rng(seed, Stream::Oversampling, partition.len() as u64),
            )?,
            None => (x, labels, 0),
        };

        log::debug!(
            "Fitted recipe on {} ({} rows, {} design columns, {} synthetic, dropped {:?})",
            partition.name(),
            partition.len(),
            feature_names.len(),
            n_synthetic,
            dropped.all()
        );

        let fitted = FittedRecipe {
            schema: schema.clone(),
            attributes,
            derived,
            imputer,
            dropped,
            power,
            scaler,
            encoder,
            feature_names,
            feature_parents,
        };
        Ok((
            fitted,
            TrainingSet {
                x: x_train,
                y: y_train,
                n_synthetic,
            },
        ))
    }

    fn kept_attributes(&self, schema: &Schema) -> Result<Vec<usize>, ModelError> {
        for name in &self.options.exclude {
            schema.require(name)?;
        }
        let kept: Vec<usize> = schema
            .attributes()
            .iter()
            .enumerate()
            .filter(|(_, a)| !self.options.exclude.contains(&a.name))
            .map(|(i, _)| i)
            .collect();
        if kept.is_empty() {
            return Err(ModelError::config("every attribute is excluded"));
        }
        Ok(kept)
    }

    fn usable_derived(&self, schema: &Schema, attributes: &[usize]) -> Vec<DerivedFeature> {
        self.options
            .derived_features
            .iter()
            .filter(|f| {
                f.sources().iter().all(|s| {
                    schema.position(s).map_or(false, |p| {
                        attributes.contains(&p)
                            && schema.attributes()[p].kind == AttributeKind::Numeric
                    })
                })
            })
            .cloned()
            .collect()
    }
}

fn build_frame(
    schema: &Schema,
    attributes: &[usize],
    derived: &[DerivedFeature],
    imputed: &[PatientRecord],
) -> Frame {
    let mut columns = Vec::with_capacity(attributes.len() + derived.len());
    for &a in attributes {
        let attr = &schema.attributes()[a];
        let values = imputed.iter().map(|r| r.get(a));
        let data = match &attr.kind {
            AttributeKind::Numeric => {
                ColumnData::Continuous(values.map(|v| v.as_f64().unwrap_or(0.0)).collect())
            }
            AttributeKind::Boolean => {
                ColumnData::Binary(values.map(|v| v.as_f64().unwrap_or(0.0)).collect())
            }
            AttributeKind::Categorical { levels } => ColumnData::Categorical {
                codes: values
                    .map(|v| v.as_f64().map_or(0, |c| c as usize))
                    .collect(),
                levels: levels.clone(),
            },
        };
        columns.push(Column {
            name: attr.name.clone(),
            parents: vec![a],
            data,
        });
    }
    for feature in derived {
        let sources: Vec<usize> = feature
            .sources()
            .iter()
            .filter_map(|s| schema.position(s))
            .collect();
        let values = imputed
            .iter()
            .map(|r| {
                let inputs: Vec<f64> = sources
                    .iter()
                    .map(|&p| r.get(p).as_f64().unwrap_or(0.0))
                    .collect();
                feature.evaluate(&inputs)
            })
            .collect();
        columns.push(Column {
            name: feature.name().to_string(),
            parents: sources,
            data: ColumnData::Continuous(values),
        });
    }
    Frame { columns }
}

/// Parameters learned by every recipe step on one training partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedRecipe {
    schema: Schema,
    attributes: Vec<usize>,
    derived: Vec<DerivedFeature>,
    imputer: Imputer,
    dropped: DroppedColumns,
    power: Vec<PowerTransform>,
    scaler: Scaler,
    encoder: OneHotEncoder,
    feature_names: Vec<String>,
    feature_parents: Vec<Vec<usize>>,
}

impl FittedRecipe {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Schema positions of the raw attributes feeding the design.
    pub fn kept_attributes(&self) -> &[usize] {
        &self.attributes
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Raw attribute positions behind each design column.
    pub fn feature_parents(&self) -> &[Vec<usize>] {
        &self.feature_parents
    }

    pub fn dropped(&self) -> &DroppedColumns {
        &self.dropped
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn power_transforms(&self) -> &[PowerTransform] {
        &self.power
    }

    /// Transform the records of `partition` with the learned parameters.
    pub fn apply(&self, dataset: &Dataset, partition: &Partition) -> Result<DesignMatrix, ModelError> {
        if dataset.schema() != &self.schema {
            return Err(ModelError::schema(
                "dataset schema differs from the schema the recipe was fitted on",
            ));
        }
        self.apply_records(&partition.records(dataset))
    }

    /// Transform raw records with the learned parameters. Never oversamples.
    pub fn apply_records(&self, records: &[PatientRecord]) -> Result<DesignMatrix, ModelError> {
        for record in records {
            self.schema.validate_record(record)?;
        }
        let imputed: Vec<PatientRecord> = records
            .iter()
            .map(|r| self.imputer.apply(&self.schema, r))
            .collect();
        let mut frame = build_frame(&self.schema, &self.attributes, &self.derived, &imputed);
        frame.drop_named(&self.dropped.all());

        for fitted in &self.power {
            let col = frame.position(&fitted.column).ok_or_else(|| {
                ModelError::schema(format!("column '{}' missing at apply time", fitted.column))
            })?;
            if let Some(values) = frame.columns[col].numeric_values_mut() {
                fitted.apply(values);
            }
        }
        for col in frame.columns.iter_mut() {
            let name = col.name.clone();
            if let Some(values) = col.numeric_values_mut() {
                if !self.scaler.transform_column(&name, values) {
                    return Err(ModelError::schema(format!(
                        "column '{}' has no fitted scaling",
                        name
                    )));
                }
            }
        }

        let (x, names, _) = self.encoder.encode(&frame)?;
        if names != self.feature_names {
            return Err(ModelError::ShapeMismatch {
                expected: self.feature_names.len(),
                got: names.len(),
            });
        }
        Ok(DesignMatrix {
            x,
            feature_names: names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::Value;
    use crate::synthetic::simulate_cohort;

    #[test]
    fn apply_matches_fit_time_matrix_without_oversampling() {
        let ds = simulate_cohort(200, 8);
        let all = ds.full_partition();
        let options = RecipeOptions {
            oversampling: None,
            ..RecipeOptions::default()
        };
        let (fitted, training) = Recipe::new(options).fit(&ds, &all, 1).unwrap();
        let applied = fitted.apply(&ds, &all).unwrap();
        assert_eq!(applied.x.nrows(), training.x.nrows());
        for (a, b) in applied.x.iter().zip(training.x.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn oversampling_only_grows_training_matrix() {
        let ds = simulate_cohort(200, 8);
        let all = ds.full_partition();
        let (fitted, training) = Recipe::default().fit(&ds, &all, 1).unwrap();
        assert!(training.n_synthetic > 0);
        assert_eq!(training.x.nrows(), ds.len() + training.n_synthetic);
        assert_eq!(fitted.apply(&ds, &all).unwrap().x.nrows(), ds.len());
    }

    #[test]
    fn constant_column_is_dropped_and_logged() {
        let ds = simulate_cohort(120, 4);
        let records: Vec<PatientRecord> = ds
            .records()
            .iter()
            .map(|r| r.with_value(0, Value::Numeric(60.0)))
            .collect();
        let flat = Dataset::new(ds.schema().clone(), records, ds.outcomes().to_vec()).unwrap();
        let options = RecipeOptions {
            near_zero_variance: None,
            ..RecipeOptions::default()
        };
        let (fitted, _) = Recipe::new(options)
            .fit(&flat, &flat.full_partition(), 2)
            .unwrap();
        assert_eq!(fitted.dropped().degenerate, vec!["age".to_string()]);
        assert!(!fitted.feature_names().iter().any(|n| n == "age"));
    }

    #[test]
    fn excluded_attribute_leaves_no_columns() {
        let ds = simulate_cohort(150, 4);
        let options = RecipeOptions::default().excluding("severity");
        let (fitted, _) = Recipe::new(options)
            .fit(&ds, &ds.full_partition(), 2)
            .unwrap();
        assert!(!fitted
            .feature_names()
            .iter()
            .any(|n| n.starts_with("severity")));
        let unknown = RecipeOptions::default().excluding("weight");
        assert!(matches!(
            Recipe::new(unknown).fit(&ds, &ds.full_partition(), 2),
            Err(ModelError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn categorical_levels_are_fixed_by_schema() {
        let ds = simulate_cohort(150, 6);
        let (fitted, _) = Recipe::default().fit(&ds, &ds.full_partition(), 3).unwrap();
        for level in ["severity_mild", "severity_moderate", "severity_severe"] {
            assert!(fitted.feature_names().iter().any(|n| n == level));
        }
        let only_mild: Vec<usize> = (0..ds.len())
            .filter(|&i| ds.record(i).get(2) == Value::Level(0))
            .collect();
        let design = fitted
            .apply(&ds, &Partition::new("mild", only_mild))
            .unwrap();
        assert_eq!(design.feature_names, fitted.feature_names());
        assert!(design
            .column("severity_severe")
            .unwrap()
            .iter()
            .all(|&v| v == 0.0));
    }
}
