//! `triage train`: run a full study and write one bundle per family.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use triage_classifiers::config::{load_study_config, ModelFamily, StudyConfig};
use triage_classifiers::data_handling::Schema;
use triage_classifiers::io::patient_csv::{read_patient_csv, PatientReaderConfig};
use triage_classifiers::pipeline::{AblationResult, Study, StudyReport};

#[derive(Debug, Clone)]
pub struct TrainArgs {
    pub config: Option<PathBuf>,
    pub data: PathBuf,
    pub output_dir: PathBuf,
    pub seed: Option<u64>,
    pub reader: PatientReaderConfig,
}

fn study_config(path: Option<&PathBuf>, seed: Option<u64>) -> Result<StudyConfig> {
    let mut config = match path {
        Some(path) => {
            log::info!("Using config: {:?}", path);
            load_study_config(path)?
        }
        None => {
            log::info!("No config provided; using defaults.");
            StudyConfig::default()
        }
    };
    if let Some(seed) = seed {
        config.seed = seed;
    }
    Ok(config)
}

pub fn bundle_path(output_dir: &Path, family: ModelFamily) -> PathBuf {
    output_dir.join(format!("{}.bundle.json", family))
}

/// Run the study and write `<family>.bundle.json` files and `report.json`.
pub fn run_train(args: &TrainArgs) -> Result<StudyReport> {
    let config = study_config(args.config.as_ref(), args.seed)?;
    let dataset = read_patient_csv(&args.data, &Schema::clinical(), &args.reader)?;

    let outcome = Study::run(&dataset, &config).context("Study failed")?;

    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("Failed to create output directory: {}", args.output_dir.display())
    })?;
    for bundle in &outcome.bundles {
        let path = bundle_path(&args.output_dir, bundle.family());
        std::fs::write(&path, bundle.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Wrote {}", path.display());
    }
    let report_path = args.output_dir.join("report.json");
    let report_json = serde_json::to_string_pretty(&outcome.report)?;
    std::fs::write(&report_path, report_json)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    log::info!("Wrote {}", report_path.display());

    Ok(outcome.report)
}

/// Retrain one family without `attribute` and report both test AUCs.
pub fn run_ablation(
    args: &TrainArgs,
    family: ModelFamily,
    attribute: &str,
) -> Result<AblationResult> {
    let config = study_config(args.config.as_ref(), args.seed)?;
    let dataset = read_patient_csv(&args.data, &Schema::clinical(), &args.reader)?;
    let result = Study::ablation(&dataset, &config, family, attribute)
        .with_context(|| format!("Ablation of '{}' failed", attribute))?;
    Ok(result)
}

/// One line per family for the terminal.
pub fn summarize(report: &StudyReport) -> String {
    let mut lines = vec![format!(
        "{} patients ({} train / {} test), test prevalence {:.3}",
        report.n_patients, report.n_train, report.n_test, report.prevalence_test
    )];
    for (evaluation, tuning) in report.evaluations.iter().zip(&report.tuning) {
        let fmt = |v: Option<f64>| v.map_or("NA".to_string(), |v| format!("{:.3}", v));
        lines.push(format!(
            "{:<15} AUC {} [{}, {}]  threshold {:.3}",
            evaluation.family.as_str(),
            fmt(evaluation.auc.value),
            fmt(evaluation.auc.lower),
            fmt(evaluation.auc.upper),
            tuning.operating_point.threshold
        ));
    }
    if !report.retained_attributes.is_empty() {
        lines.push(format!(
            "retained attributes: {}",
            report.retained_attributes.join(", ")
        ));
    }
    lines.join("\n")
}
