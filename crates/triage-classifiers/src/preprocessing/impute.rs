//! Missing-value imputation.
//!
//! Numeric attributes borrow the mean of their nearest training neighbours
//! (Gower-style distance over the other observed attributes). Boolean and
//! categorical attributes take the training mode.
use serde::{Deserialize, Serialize};

use crate::data_handling::{AttributeKind, PatientRecord, Schema, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Imputer {
    attributes: Vec<usize>,
    neighbors: usize,
    reference: Vec<PatientRecord>,
    /// Observed range per attribute, used to scale numeric distances.
    ranges: Vec<f64>,
    /// Fallback per attribute: mode for boolean/categorical, mean for numeric.
    fallback: Vec<Value>,
}

impl Imputer {
    /// Learn imputation parameters from training records.
    ///
    /// `attributes` lists the schema positions the recipe keeps.
    pub fn fit(
        schema: &Schema,
        attributes: &[usize],
        training: &[PatientRecord],
        neighbors: usize,
    ) -> Self {
        let n_attr = schema.len();
        let mut ranges = vec![1.0; n_attr];
        let mut fallback = vec![Value::Missing; n_attr];

        for &a in attributes {
            let observed: Vec<Value> = training
                .iter()
                .map(|r| r.get(a))
                .filter(|v| !v.is_missing())
                .collect();
            match &schema.attributes()[a].kind {
                AttributeKind::Numeric => {
                    let values: Vec<f64> = observed.iter().filter_map(|v| v.as_f64()).collect();
                    if !values.is_empty() {
                        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
                        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        ranges[a] = if hi - lo > 0.0 { hi - lo } else { 1.0 };
                        let mean = values.iter().sum::<f64>() / values.len() as f64;
                        fallback[a] = Value::Numeric(mean);
                    }
                }
                AttributeKind::Boolean => {
                    let trues = observed.iter().filter(|v| **v == Value::Boolean(true)).count();
                    let falses = observed.len() - trues;
                    if !observed.is_empty() {
                        fallback[a] = Value::Boolean(trues > falses);
                    }
                }
                AttributeKind::Categorical { levels } => {
                    let mut counts = vec![0usize; levels.len()];
                    for v in &observed {
                        if let Value::Level(l) = v {
                            counts[*l] += 1;
                        }
                    }
                    // Ties resolve to the first declared level.
                    let mut best = 0;
                    for (l, &c) in counts.iter().enumerate() {
                        if c > counts[best] {
                            best = l;
                        }
                    }
                    if !observed.is_empty() {
                        fallback[a] = Value::Level(best);
                    }
                }
            }
        }

        Imputer {
            attributes: attributes.to_vec(),
            neighbors: neighbors.max(1),
            reference: training.to_vec(),
            ranges,
            fallback,
        }
    }

    /// Fill every missing value of the kept attributes.
    pub fn apply(&self, schema: &Schema, record: &PatientRecord) -> PatientRecord {
        let mut values = record.values().to_vec();
        for &a in &self.attributes {
            if !record.get(a).is_missing() {
                continue;
            }
            values[a] = match schema.attributes()[a].kind {
                AttributeKind::Numeric => self
                    .nearest_neighbour_mean(schema, record, a)
                    .map(Value::Numeric)
                    .unwrap_or(self.fallback[a]),
                _ => self.fallback[a],
            };
            if values[a].is_missing() {
                // Attribute never observed in training.
                values[a] = match schema.attributes()[a].kind {
                    AttributeKind::Numeric => Value::Numeric(0.0),
                    AttributeKind::Boolean => Value::Boolean(false),
                    AttributeKind::Categorical { .. } => Value::Level(0),
                };
            }
        }
        PatientRecord::new(values)
    }

    fn nearest_neighbour_mean(
        &self,
        schema: &Schema,
        query: &PatientRecord,
        target: usize,
    ) -> Option<f64> {
        let mut candidates: Vec<(f64, usize)> = self
            .reference
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.get(target).is_missing())
            .map(|(i, r)| (self.distance(schema, query, r, target), i))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let k = self.neighbors.min(candidates.len());
        let sum: f64 = candidates[..k]
            .iter()
            .filter_map(|&(_, i)| self.reference[i].get(target).as_f64())
            .sum();
        Some(sum / k as f64)
    }

    fn distance(
        &self,
        schema: &Schema,
        a: &PatientRecord,
        b: &PatientRecord,
        skip: usize,
    ) -> f64 {
        let mut total = 0.0;
        let mut compared = 0usize;
        for &attr in &self.attributes {
            if attr == skip {
                continue;
            }
            let (va, vb) = match (a.get(attr).as_f64(), b.get(attr).as_f64()) {
                (Some(va), Some(vb)) => (va, vb),
                _ => continue,
            };
            total += match schema.attributes()[attr].kind {
                AttributeKind::Numeric => ((va - vb).abs() / self.ranges[attr]).min(1.0),
                _ => {
                    if va == vb {
                        0.0
                    } else {
                        1.0
                    }
                }
            };
            compared += 1;
        }
        if compared == 0 {
            1.0
        } else {
            total / compared as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(age: Option<f64>, sex: Option<usize>, albumin: Option<f64>) -> PatientRecord {
        let schema = Schema::clinical();
        let mut values = vec![Value::Missing; schema.len()];
        values[0] = age.map_or(Value::Missing, Value::Numeric);
        values[1] = sex.map_or(Value::Missing, Value::Level);
        values[5] = albumin.map_or(Value::Missing, Value::Numeric);
        PatientRecord::new(values)
    }

    #[test]
    fn numeric_uses_nearest_neighbours() {
        let schema = Schema::clinical();
        let training = vec![
            rec(Some(30.0), Some(0), Some(4.5)),
            rec(Some(32.0), Some(0), Some(4.3)),
            rec(Some(80.0), Some(1), Some(2.5)),
            rec(Some(82.0), Some(1), Some(2.7)),
        ];
        let imputer = Imputer::fit(&schema, &[0, 1, 5], &training, 2);
        let filled = imputer.apply(&schema, &rec(Some(81.0), Some(1), None));
        match filled.get(5) {
            Value::Numeric(v) => assert!((v - 2.6).abs() < 1e-12),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn categorical_uses_mode_with_first_level_on_ties() {
        let schema = Schema::clinical();
        let training = vec![
            rec(Some(30.0), Some(1), Some(4.5)),
            rec(Some(32.0), Some(0), Some(4.3)),
        ];
        let imputer = Imputer::fit(&schema, &[0, 1, 5], &training, 3);
        let filled = imputer.apply(&schema, &rec(Some(40.0), None, Some(3.0)));
        assert_eq!(filled.get(1), Value::Level(0));
    }
}
