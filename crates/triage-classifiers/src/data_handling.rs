//! Schema, patient records, datasets and index partitions.
//!
//! The clinical schema is fixed: every attribute declares its semantic type
//! up front and all partitions derived from a `Dataset` share that schema,
//! including the level sets of categorical attributes.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Name of the outcome column in cleaned input files.
pub const OUTCOME_COLUMN: &str = "deceased";

/// Semantic type of a raw attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Numeric,
    Boolean,
    Categorical { levels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
}

impl Attribute {
    pub fn numeric(name: &str) -> Self {
        Attribute {
            name: name.to_string(),
            kind: AttributeKind::Numeric,
        }
    }

    pub fn boolean(name: &str) -> Self {
        Attribute {
            name: name.to_string(),
            kind: AttributeKind::Boolean,
        }
    }

    pub fn categorical(name: &str, levels: &[&str]) -> Self {
        Attribute {
            name: name.to_string(),
            kind: AttributeKind::Categorical {
                levels: levels.iter().map(|l| l.to_string()).collect(),
            },
        }
    }
}

/// One raw attribute value. Categorical values hold the index of their level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Numeric(f64),
    Boolean(bool),
    Level(usize),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Numeric view used by distance computations. Booleans map to 0/1 and
    /// levels to their index.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Numeric(v) => Some(v),
            Value::Boolean(b) => Some(if b { 1.0 } else { 0.0 }),
            Value::Level(l) => Some(l as f64),
            Value::Missing => None,
        }
    }
}

/// Ordered attribute declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    attributes: Vec<Attribute>,
}

impl Schema {
    /// Build a schema, rejecting duplicate names and empty level sets.
    pub fn new(attributes: Vec<Attribute>) -> Result<Self, ModelError> {
        for (i, attr) in attributes.iter().enumerate() {
            if attributes[..i].iter().any(|a| a.name == attr.name) {
                return Err(ModelError::schema(format!(
                    "attribute '{}' declared twice",
                    attr.name
                )));
            }
            if let AttributeKind::Categorical { levels } = &attr.kind {
                if levels.is_empty() {
                    return Err(ModelError::schema(format!(
                        "categorical attribute '{}' has no levels",
                        attr.name
                    )));
                }
            }
        }
        Ok(Schema { attributes })
    }

    /// The eight-variable clinical schema.
    pub fn clinical() -> Self {
        Schema {
            attributes: vec![
                Attribute::numeric("age"),
                Attribute::categorical("sex", &["female", "male"]),
                Attribute::categorical("severity", &["mild", "moderate", "severe"]),
                Attribute::boolean("dyspnea"),
                Attribute::boolean("headache"),
                Attribute::numeric("albumin"),
                Attribute::numeric("platelets"),
                Attribute::numeric("bilirubin"),
            ],
        }
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.attributes.iter().map(|a| a.name.clone()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn require(&self, name: &str) -> Result<usize, ModelError> {
        self.position(name)
            .ok_or_else(|| ModelError::schema(format!("unknown attribute '{}'", name)))
    }

    /// Parse one textual cell for attribute `idx`. Empty cells and `NA` are missing.
    pub fn parse_value(&self, idx: usize, raw: &str) -> Result<Value, ModelError> {
        let attr = self
            .attributes
            .get(idx)
            .ok_or_else(|| ModelError::schema(format!("attribute index {} out of range", idx)))?;
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan") {
            return Ok(Value::Missing);
        }
        match &attr.kind {
            AttributeKind::Numeric => {
                let v: f64 = raw.parse().map_err(|_| {
                    ModelError::schema(format!("'{}' is not numeric for '{}'", raw, attr.name))
                })?;
                if !v.is_finite() {
                    return Err(ModelError::schema(format!(
                        "non-finite value for '{}'",
                        attr.name
                    )));
                }
                Ok(Value::Numeric(v))
            }
            AttributeKind::Boolean => parse_flag(raw).map(Value::Boolean).ok_or_else(|| {
                ModelError::schema(format!("'{}' is not a boolean for '{}'", raw, attr.name))
            }),
            AttributeKind::Categorical { levels } => levels
                .iter()
                .position(|l| l.eq_ignore_ascii_case(raw))
                .map(Value::Level)
                .ok_or_else(|| {
                    ModelError::schema(format!(
                        "unknown level '{}' for '{}' (expected one of {:?})",
                        raw, attr.name, levels
                    ))
                }),
        }
    }

    /// Build a record from `(attribute, text)` pairs. Attributes not named are missing.
    pub fn record_from_pairs<I, K, V>(&self, pairs: I) -> Result<PatientRecord, ModelError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut values = vec![Value::Missing; self.len()];
        let mut seen = vec![false; self.len()];
        for (name, raw) in pairs {
            let idx = self.require(name.as_ref())?;
            if seen[idx] {
                return Err(ModelError::schema(format!(
                    "attribute '{}' given twice",
                    name.as_ref()
                )));
            }
            seen[idx] = true;
            values[idx] = self.parse_value(idx, raw.as_ref())?;
        }
        Ok(PatientRecord { values })
    }

    /// Check that a record has one value per attribute of the declared type.
    pub fn validate_record(&self, record: &PatientRecord) -> Result<(), ModelError> {
        if record.values.len() != self.len() {
            return Err(ModelError::schema(format!(
                "record has {} values, schema declares {}",
                record.values.len(),
                self.len()
            )));
        }
        for (attr, value) in self.attributes.iter().zip(record.values.iter()) {
            let ok = match (&attr.kind, value) {
                (_, Value::Missing) => true,
                (AttributeKind::Numeric, Value::Numeric(v)) => v.is_finite(),
                (AttributeKind::Boolean, Value::Boolean(_)) => true,
                (AttributeKind::Categorical { levels }, Value::Level(l)) => *l < levels.len(),
                _ => false,
            };
            if !ok {
                return Err(ModelError::schema(format!(
                    "value {:?} does not fit attribute '{}'",
                    value, attr.name
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "t" => Some(true),
        "0" | "false" | "no" | "n" | "f" => Some(false),
        _ => None,
    }
}

/// Immutable row of raw attribute values, ordered as in the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    values: Vec<Value>,
}

impl PatientRecord {
    pub fn new(values: Vec<Value>) -> Self {
        PatientRecord { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, idx: usize) -> Value {
        self.values.get(idx).copied().unwrap_or(Value::Missing)
    }

    /// Copy of this record with one attribute replaced.
    pub fn with_value(&self, idx: usize, value: Value) -> Self {
        let mut values = self.values.clone();
        if let Some(slot) = values.get_mut(idx) {
            *slot = value;
        }
        PatientRecord { values }
    }
}

/// Ordered, immutable collection of labelled records sharing one schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: Schema,
    records: Vec<PatientRecord>,
    outcomes: Vec<bool>,
}

impl Dataset {
    pub fn new(
        schema: Schema,
        records: Vec<PatientRecord>,
        outcomes: Vec<bool>,
    ) -> Result<Self, ModelError> {
        if records.len() != outcomes.len() {
            return Err(ModelError::ShapeMismatch {
                expected: records.len(),
                got: outcomes.len(),
            });
        }
        for (i, record) in records.iter().enumerate() {
            schema.validate_record(record).map_err(|e| match e {
                ModelError::SchemaViolation { detail } => {
                    ModelError::schema(format!("row {}: {}", i + 1, detail))
                }
                other => other,
            })?;
        }
        Ok(Dataset {
            schema,
            records,
            outcomes,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, idx: usize) -> &PatientRecord {
        &self.records[idx]
    }

    pub fn records(&self) -> &[PatientRecord] {
        &self.records
    }

    pub fn outcome(&self, idx: usize) -> bool {
        self.outcomes[idx]
    }

    pub fn outcomes(&self) -> &[bool] {
        &self.outcomes
    }

    /// Partition covering every record in order.
    pub fn full_partition(&self) -> Partition {
        Partition::new("all", (0..self.len()).collect())
    }

    pub fn log_input_data_summary(&self) {
        let deceased = self.outcomes.iter().filter(|&&o| o).count();
        let missing: HashMap<&str, usize> = self
            .schema
            .attributes()
            .iter()
            .enumerate()
            .map(|(i, a)| {
                (
                    a.name.as_str(),
                    self.records.iter().filter(|r| r.get(i).is_missing()).count(),
                )
            })
            .filter(|(_, n)| *n > 0)
            .collect();
        log::info!(
            "Loaded {} patients ({} deceased, {} survived) over {} attributes",
            self.len(),
            deceased,
            self.len() - deceased,
            self.schema.len()
        );
        if !missing.is_empty() {
            log::info!("Missing values per attribute: {:?}", missing);
        }
    }
}

/// Named, index-only view over a `Dataset`. Indices may repeat for bootstrap
/// resamples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    name: String,
    indices: Vec<usize>,
}

impl Partition {
    pub fn new(name: impl Into<String>, indices: Vec<usize>) -> Self {
        Partition {
            name: name.into(),
            indices,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn labels(&self, dataset: &Dataset) -> Vec<bool> {
        self.indices.iter().map(|&i| dataset.outcome(i)).collect()
    }

    pub fn records(&self, dataset: &Dataset) -> Vec<PatientRecord> {
        self.indices
            .iter()
            .map(|&i| dataset.record(i).clone())
            .collect()
    }

    /// Fraction of deceased patients in the partition.
    pub fn prevalence(&self, dataset: &Dataset) -> f64 {
        if self.indices.is_empty() {
            return 0.0;
        }
        let positives = self.indices.iter().filter(|&&i| dataset.outcome(i)).count();
        positives as f64 / self.indices.len() as f64
    }

    /// Sub-partition made of the entries at `positions` of this partition.
    pub fn select(&self, name: impl Into<String>, positions: &[usize]) -> Partition {
        Partition::new(
            name,
            positions.iter().map(|&p| self.indices[p]).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_values() {
        let schema = Schema::clinical();
        let record = schema
            .record_from_pairs([
                ("age", "71"),
                ("sex", "Male"),
                ("severity", "severe"),
                ("dyspnea", "yes"),
                ("albumin", "NA"),
            ])
            .unwrap();
        assert_eq!(record.get(0), Value::Numeric(71.0));
        assert_eq!(record.get(1), Value::Level(1));
        assert_eq!(record.get(2), Value::Level(2));
        assert_eq!(record.get(3), Value::Boolean(true));
        assert!(record.get(4).is_missing());
        assert!(record.get(5).is_missing());
    }

    #[test]
    fn rejects_unknown_attribute_and_level() {
        let schema = Schema::clinical();
        assert!(matches!(
            schema.record_from_pairs([("weight", "80")]),
            Err(ModelError::SchemaViolation { .. })
        ));
        assert!(matches!(
            schema.record_from_pairs([("severity", "critical")]),
            Err(ModelError::SchemaViolation { .. })
        ));
        assert!(matches!(
            schema.record_from_pairs([("age", "old")]),
            Err(ModelError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn dataset_rejects_mistyped_record() {
        let schema = Schema::clinical();
        let mut values = vec![Value::Missing; schema.len()];
        values[0] = Value::Boolean(true);
        let err = Dataset::new(schema, vec![PatientRecord::new(values)], vec![false]);
        assert!(matches!(err, Err(ModelError::SchemaViolation { .. })));
    }

    #[test]
    fn schema_rejects_duplicate_names() {
        let err = Schema::new(vec![Attribute::numeric("age"), Attribute::numeric("age")]);
        assert!(matches!(err, Err(ModelError::SchemaViolation { .. })));
    }

    #[test]
    fn partition_prevalence_and_select() {
        let schema = Schema::clinical();
        let records = vec![PatientRecord::new(vec![Value::Missing; schema.len()]); 4];
        let ds = Dataset::new(schema, records, vec![true, false, false, true]).unwrap();
        let all = ds.full_partition();
        assert!((all.prevalence(&ds) - 0.5).abs() < 1e-12);
        let sub = all.select("sub", &[0, 0, 3]);
        assert_eq!(sub.indices(), &[0, 0, 3]);
        assert_eq!(sub.labels(&ds), vec![true, true, true]);
    }
}
