//! `triage simulate`: write a synthetic cohort CSV.
use std::path::Path;

use anyhow::Result;

use triage_classifiers::io::patient_csv::write_patient_csv;
use triage_classifiers::synthetic::simulate_cohort;

pub fn run_simulate(n: usize, seed: u64, output: &Path) -> Result<()> {
    if n == 0 {
        anyhow::bail!("Cohort size must be positive");
    }
    let dataset = simulate_cohort(n, seed);
    write_patient_csv(&dataset, output)?;
    log::info!(
        "Simulated {} patients (seed {}) into {}",
        n,
        seed,
        output.display()
    );
    Ok(())
}
