//! `triage explain`: per-patient attributions from a trained bundle.
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use triage_classifiers::explain::shapley::AttributionSet;
use triage_classifiers::io::patient_csv::{read_patient_records, PatientReaderConfig};

use super::{load_bundle, write_or_print};

#[derive(Debug, Clone)]
pub struct ExplainArgs {
    pub model: PathBuf,
    pub data: PathBuf,
    pub output: Option<PathBuf>,
    /// Only the largest contributions by magnitude are kept when set.
    pub top: Option<usize>,
    pub reader: PatientReaderConfig,
}

#[derive(Debug, Serialize)]
struct PatientExplanation {
    row: usize,
    high_risk: bool,
    #[serde(flatten)]
    attributions: AttributionSet,
}

pub fn run_explain(args: &ExplainArgs) -> Result<usize> {
    let bundle = load_bundle(&args.model)?;
    let records = read_patient_records(&args.data, bundle.schema(), &args.reader)?;

    let mut explanations = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        let mut attributions = bundle
            .explain(record)
            .with_context(|| format!("Failed to explain row {}", idx + 1))?;
        if let Some(top) = args.top {
            attributions
                .contributions
                .sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
            attributions.contributions.truncate(top);
        }
        explanations.push(PatientExplanation {
            row: idx + 1,
            high_risk: attributions.prediction >= bundle.threshold(),
            attributions,
        });
    }
    write_or_print(
        args.output.as_deref(),
        &serde_json::to_string_pretty(&explanations)?,
    )?;
    Ok(explanations.len())
}
