//! `triage predict`: score patients with a trained bundle.
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use triage_classifiers::io::patient_csv::{read_patient_records, PatientReaderConfig};

use super::{load_bundle, write_or_print};

#[derive(Debug, Clone)]
pub struct PredictArgs {
    pub model: PathBuf,
    pub data: PathBuf,
    pub output: Option<PathBuf>,
    pub reader: PatientReaderConfig,
}

#[derive(Debug, Serialize)]
struct PredictionRow {
    row: usize,
    probability: f64,
    high_risk: bool,
}

/// Write `row,probability,high_risk` for every patient in `args.data`.
pub fn run_predict(args: &PredictArgs) -> Result<usize> {
    let bundle = load_bundle(&args.model)?;
    let records = read_patient_records(&args.data, bundle.schema(), &args.reader)?;
    let probabilities = bundle.workflow().predict_records(&records)?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    for (row, probability) in probabilities.into_iter().enumerate() {
        writer.serialize(PredictionRow {
            row: row + 1,
            probability,
            high_risk: probability >= bundle.threshold(),
        })?;
    }
    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("{}", e))?;
    write_or_print(args.output.as_deref(), String::from_utf8(bytes)?.trim_end())?;
    Ok(records.len())
}
