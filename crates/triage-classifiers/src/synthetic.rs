//! Deterministic synthetic cohorts over the clinical schema.
//!
//! Outcomes follow a known logistic risk surface: severity dominates,
//! albumin and platelets are protective, age, bilirubin and dyspnea are
//! harmful. A few lab values are left missing to exercise imputation.
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::Normal;

use crate::data_handling::{Dataset, PatientRecord, Schema, Value};
use crate::rng::{task_rng, Stream};

const SEVERITY_EFFECT: [f64; 3] = [-1.6, 0.4, 2.4];

/// Probability of death for one simulated patient, before sampling the outcome.
///
/// Platelets are counts per microlitre.
pub fn true_risk(
    age: f64,
    male: bool,
    severity: usize,
    dyspnea: bool,
    headache: bool,
    albumin: f64,
    platelets: f64,
    bilirubin: f64,
) -> f64 {
    let logit = -3.2
        + 0.06 * (age - 55.0)
        + SEVERITY_EFFECT[severity.min(2)]
        - 1.3 * (albumin - 3.6)
        + 0.5 * (bilirubin - 1.0)
        - 4.0e-6 * (platelets - 230_000.0)
        + if dyspnea { 0.7 } else { 0.0 }
        - if headache { 0.2 } else { 0.0 }
        + if male { 0.25 } else { 0.0 };
    1.0 / (1.0 + (-logit).exp())
}

/// Simulate `n` patients from `seed`.
pub fn simulate_cohort(n: usize, seed: u64) -> Dataset {
    let schema = Schema::clinical();
    let mut rng = task_rng(seed, Stream::Simulation, n as u64);
    let unit = Normal::new(0.0, 1.0).expect("unit normal is valid");

    let mut records = Vec::with_capacity(n);
    let mut outcomes = Vec::with_capacity(n);
    for _ in 0..n {
        let age: f64 = rng.gen_range(20.0..90.0);
        let male = rng.gen_bool(0.5);
        let u: f64 = rng.gen();
        let severity = if u < 0.45 {
            0
        } else if u < 0.8 {
            1
        } else {
            2
        };
        let sev = severity as f64;
        let albumin = (4.0 - 0.4 * sev + 0.45 * unit.sample(&mut rng)).clamp(1.5, 5.5);
        let platelets =
            (250_000.0 - 20_000.0 * sev + 60_000.0 * unit.sample(&mut rng)).max(20_000.0);
        let bilirubin = (0.15 * sev + 0.4 * unit.sample(&mut rng)).exp();
        let dyspnea = rng.gen_bool(0.15 + 0.25 * sev);
        let headache = rng.gen_bool(0.3);

        let risk = true_risk(
            age, male, severity, dyspnea, headache, albumin, platelets, bilirubin,
        );
        outcomes.push(rng.gen_bool(risk));

        let albumin = if rng.gen_bool(0.04) {
            Value::Missing
        } else {
            Value::Numeric(round_to(albumin, 1))
        };
        let platelets = if rng.gen_bool(0.02) {
            Value::Missing
        } else {
            Value::Numeric((platelets / 1000.0).round() * 1000.0)
        };
        let bilirubin = if rng.gen_bool(0.03) {
            Value::Missing
        } else {
            Value::Numeric(round_to(bilirubin, 2))
        };
        records.push(PatientRecord::new(vec![
            Value::Numeric(age.round()),
            Value::Level(usize::from(male)),
            Value::Level(severity),
            Value::Boolean(dyspnea),
            Value::Boolean(headache),
            albumin,
            platelets,
            bilirubin,
        ]));
    }

    Dataset::new(schema, records, outcomes).expect("simulated records follow the clinical schema")
}

fn round_to(v: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (v * scale).round() / scale
}
