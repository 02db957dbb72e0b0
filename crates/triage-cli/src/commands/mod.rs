//! Subcommand implementations for the `triage` binary.
use std::path::Path;

use anyhow::{Context, Result};

use triage_classifiers::data_handling::Schema;
use triage_classifiers::io::patient_csv::PatientReaderConfig;
use triage_classifiers::workflow::ModelBundle;

pub mod explain;
pub mod predict;
pub mod simulate;
pub mod train;

/// Parse a `raw=attribute` header rename.
pub fn parse_alias(raw: &str) -> Result<(String, String)> {
    let (from, to) = raw
        .split_once('=')
        .with_context(|| format!("Alias '{}' must look like header=attribute", raw))?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        anyhow::bail!("Alias '{}' has an empty side", raw);
    }
    Ok((from.to_string(), to.to_string()))
}

pub fn reader_config(aliases: &[String]) -> Result<PatientReaderConfig> {
    Ok(PatientReaderConfig {
        aliases: aliases
            .iter()
            .map(|a| parse_alias(a))
            .collect::<Result<Vec<_>>>()?,
        ..Default::default()
    })
}

/// Load a bundle written by `triage train`, checking it against the clinical schema.
pub fn load_bundle<P: AsRef<Path>>(path: P) -> Result<ModelBundle> {
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read model bundle: {}", path.as_ref().display()))?;
    let bundle = ModelBundle::from_json(&json, &Schema::clinical())
        .with_context(|| format!("Failed to load model bundle: {}", path.as_ref().display()))?;
    log::info!(
        "Loaded {} bundle trained at {} (threshold {:.4})",
        bundle.family(),
        bundle.trained_at(),
        bundle.threshold()
    );
    Ok(bundle)
}

/// Write `contents` to `path`, or to stdout when no path is given.
pub fn write_or_print(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{}", contents);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_parsing() {
        assert_eq!(
            parse_alias("Age_Years = age").unwrap(),
            ("Age_Years".to_string(), "age".to_string())
        );
        assert!(parse_alias("age").is_err());
        assert!(parse_alias("=age").is_err());
    }
}
