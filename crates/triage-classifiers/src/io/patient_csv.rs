//! Patient CSV reader and writer.
//!
//! One row per patient, one column per schema attribute plus the outcome
//! column. Header matching is case-insensitive and may go through aliases;
//! two headers that resolve to the same attribute are rejected.
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;

use crate::data_handling::{
    parse_flag, AttributeKind, Dataset, PatientRecord, Schema, Value, OUTCOME_COLUMN,
};
use crate::error::ModelError;

#[derive(Debug, Clone)]
pub struct PatientReaderConfig {
    /// Column holding the in-hospital death flag.
    pub outcome_column: String,
    pub delimiter: u8,
    /// `(raw header, attribute)` renames applied before schema matching.
    pub aliases: Vec<(String, String)>,
}

impl Default for PatientReaderConfig {
    fn default() -> Self {
        Self {
            outcome_column: OUTCOME_COLUMN.to_string(),
            delimiter: b',',
            aliases: Vec::new(),
        }
    }
}

impl PatientReaderConfig {
    fn resolve<'a>(&'a self, header: &'a str) -> &'a str {
        let header = header.trim();
        self.aliases
            .iter()
            .find(|(raw, _)| raw.eq_ignore_ascii_case(header))
            .map(|(_, target)| target.as_str())
            .unwrap_or(header)
    }
}

/// Header position of every schema attribute and, when present, of the outcome.
fn map_headers(
    headers: &StringRecord,
    schema: &Schema,
    config: &PatientReaderConfig,
) -> Result<(Vec<usize>, Option<usize>), ModelError> {
    let mut columns: Vec<Option<usize>> = vec![None; schema.len()];
    let mut outcome: Option<usize> = None;
    for (pos, header) in headers.iter().enumerate() {
        let name = config.resolve(header);
        let slot = if name.eq_ignore_ascii_case(&config.outcome_column) {
            &mut outcome
        } else {
            let idx = schema
                .attributes()
                .iter()
                .position(|a| a.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| ModelError::schema(format!("unknown column '{}'", header)))?;
            &mut columns[idx]
        };
        if let Some(previous) = slot {
            return Err(ModelError::schema(format!(
                "columns '{}' and '{}' both map to '{}'",
                headers.get(*previous).unwrap_or(""),
                header,
                name
            )));
        }
        *slot = Some(pos);
    }
    let columns = columns
        .into_iter()
        .zip(schema.attributes())
        .map(|(c, a)| c.ok_or_else(|| ModelError::schema(format!("missing column '{}'", a.name))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((columns, outcome))
}

/// Typed rows of a patient file plus the raw outcome cells, if the file has them.
fn read_rows<P: AsRef<Path>>(
    path: P,
    schema: &Schema,
    config: &PatientReaderConfig,
) -> Result<(Vec<PatientRecord>, Option<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(&path)
        .with_context(|| format!("Failed to open patient file: {}", path.as_ref().display()))?;

    let headers = reader
        .headers()
        .context("Failed to read patient header row")?
        .clone();
    let (columns, outcome_idx) = map_headers(&headers, schema, config)?;

    let mut records = Vec::new();
    let mut outcomes = outcome_idx.map(|_| Vec::new());
    for (row_idx, result) in reader.records().enumerate() {
        let row = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        if let (Some(idx), Some(outcomes)) = (outcome_idx, outcomes.as_mut()) {
            let raw = row
                .get(idx)
                .ok_or_else(|| anyhow!("Missing outcome at row {}", row_idx + 1))?;
            outcomes.push(raw.to_string());
        }
        let values = columns
            .iter()
            .enumerate()
            .map(|(attr, &col)| {
                schema
                    .parse_value(attr, row.get(col).unwrap_or(""))
                    .map_err(|e| match e {
                        ModelError::SchemaViolation { detail } => {
                            ModelError::schema(format!("row {}: {}", row_idx + 1, detail))
                        }
                        other => other,
                    })
            })
            .collect::<Result<Vec<Value>, _>>()?;
        records.push(PatientRecord::new(values));
    }
    Ok((records, outcomes))
}

/// Read a labelled patient CSV against `schema`.
pub fn read_patient_csv<P: AsRef<Path>>(
    path: P,
    schema: &Schema,
    config: &PatientReaderConfig,
) -> Result<Dataset> {
    let (records, raw_outcomes) = read_rows(path, schema, config)?;
    let raw_outcomes = raw_outcomes.ok_or_else(|| {
        ModelError::schema(format!("missing outcome column '{}'", config.outcome_column))
    })?;
    let outcomes = raw_outcomes
        .iter()
        .enumerate()
        .map(|(row_idx, raw)| {
            parse_flag(raw).ok_or_else(|| {
                ModelError::schema(format!(
                    "row {}: outcome '{}' is not a flag",
                    row_idx + 1,
                    raw
                ))
            })
        })
        .collect::<Result<Vec<bool>, _>>()?;

    let dataset = Dataset::new(schema.clone(), records, outcomes)?;
    dataset.log_input_data_summary();
    Ok(dataset)
}

/// Read patients to be scored. An outcome column, if present, is ignored.
pub fn read_patient_records<P: AsRef<Path>>(
    path: P,
    schema: &Schema,
    config: &PatientReaderConfig,
) -> Result<Vec<PatientRecord>> {
    let (records, _) = read_rows(path, schema, config)?;
    log::info!("Loaded {} patients to score", records.len());
    Ok(records)
}

fn format_value(kind: &AttributeKind, value: &Value) -> String {
    match (kind, value) {
        (_, Value::Missing) => "NA".to_string(),
        (_, Value::Numeric(v)) => format!("{}", v),
        (_, Value::Boolean(b)) => (if *b { "1" } else { "0" }).to_string(),
        (AttributeKind::Categorical { levels }, Value::Level(l)) => {
            levels.get(*l).cloned().unwrap_or_default()
        }
        (_, Value::Level(l)) => l.to_string(),
    }
}

/// Write `dataset` in the layout `read_patient_csv` expects.
pub fn write_patient_csv<P: AsRef<Path>>(dataset: &Dataset, path: P) -> Result<()> {
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
    let schema = dataset.schema();
    let mut header = schema.names();
    header.push(OUTCOME_COLUMN.to_string());
    writer.write_record(&header)?;
    for (record, &outcome) in dataset.records().iter().zip(dataset.outcomes()) {
        let mut row: Vec<String> = schema
            .attributes()
            .iter()
            .zip(record.values())
            .map(|(a, v)| format_value(&a.kind, v))
            .collect();
        row.push(if outcome { "1" } else { "0" }.to_string());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "age,sex,severity,dyspnea,headache,albumin,platelets,bilirubin,deceased";

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("triage_{}_{}.csv", name, std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_typed_rows_and_missing_cells() {
        let path = write_temp(
            "typed",
            &format!(
                "{}\n71,male,Severe,yes,no,2.9,140000,2.1,1\n40,female,mild,0,1,NA,,0.7,0\n",
                HEADER
            ),
        );
        let ds = read_patient_csv(&path, &Schema::clinical(), &PatientReaderConfig::default())
            .unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.outcomes(), &[true, false]);
        assert_eq!(ds.record(0).get(2), Value::Level(2));
        assert!(ds.record(1).get(5).is_missing());
        assert!(ds.record(1).get(6).is_missing());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn aliases_colliding_on_one_attribute_are_rejected() {
        let path = write_temp(
            "collide",
            "Age,age_years,sex,severity,dyspnea,headache,albumin,platelets,bilirubin,deceased\n\
             71,70,male,severe,1,0,2.9,140000,2.1,1\n",
        );
        let config = PatientReaderConfig {
            aliases: vec![("age_years".into(), "age".into())],
            ..Default::default()
        };
        let err = read_patient_csv(&path, &Schema::clinical(), &config).unwrap_err();
        assert!(err.to_string().contains("both map to 'age'"), "{}", err);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn unknown_level_and_missing_column_fail() {
        let path = write_temp(
            "badlevel",
            &format!("{}\n71,male,critical,1,0,2.9,140000,2.1,1\n", HEADER),
        );
        assert!(read_patient_csv(&path, &Schema::clinical(), &PatientReaderConfig::default())
            .is_err());
        std::fs::remove_file(path).ok();

        let path = write_temp("nocol", "age,sex,deceased\n71,male,1\n");
        let err = read_patient_csv(&path, &Schema::clinical(), &PatientReaderConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("missing column"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn unlabelled_rows_read_without_outcome() {
        let path = write_temp(
            "unlabelled",
            "age,sex,severity,dyspnea,headache,albumin,platelets,bilirubin\n\
             71,male,severe,1,0,2.9,140000,2.1\n",
        );
        let config = PatientReaderConfig::default();
        let records = read_patient_records(&path, &Schema::clinical(), &config).unwrap();
        assert_eq!(records.len(), 1);
        let err = read_patient_csv(&path, &Schema::clinical(), &config).unwrap_err();
        assert!(err.to_string().contains("missing outcome column"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn written_cohort_reads_back() {
        let ds = crate::synthetic::simulate_cohort(50, 4);
        let path = std::env::temp_dir().join(format!("triage_roundtrip_{}.csv", std::process::id()));
        write_patient_csv(&ds, &path).unwrap();
        let back =
            read_patient_csv(&path, &Schema::clinical(), &PatientReaderConfig::default()).unwrap();
        assert_eq!(back.outcomes(), ds.outcomes());
        assert_eq!(back.records(), ds.records());
        std::fs::remove_file(path).ok();
    }
}
