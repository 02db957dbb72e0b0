use triage_classifiers::config::{ModelFamily, ModelType, StudyConfig};
use triage_classifiers::data_handling::Schema;
use triage_classifiers::pipeline::Study;
use triage_classifiers::synthetic::simulate_cohort;
use triage_classifiers::tuning::Dimension;
use triage_classifiers::workflow::ModelBundle;

/// Small but complete configuration so the whole study runs quickly.
fn small_config() -> StudyConfig {
    let mut config = StudyConfig {
        seed: 11,
        n_folds: 3,
        ..Default::default()
    };
    config.bagged_trees.base = ModelType::BaggedTrees {
        n_trees: 60,
        mtry: 3,
        min_samples_leaf: 5,
        max_depth: None,
    };
    config.bagged_trees.grid_levels = 2;
    config.boosted_trees.dimensions = vec![
        Dimension::linear("max_depth", 2.0, 4.0),
        Dimension::linear("num_boost_round", 20.0, 50.0),
        Dimension::log10("learning_rate", 0.05, 0.3),
    ];
    config.boosted_trees.latin_hypercube_size = 3;
    config.kernel_machine.grid_levels = 2;
    config.evaluation.bootstrap_iterations = 100;
    config.explanation.shapley.permutations = 30;
    config.explanation.background_size = 20;
    config.explanation.max_explained_patients = Some(12);
    config.explanation.stability_resamples = 4;
    config
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn patient(schema: &Schema, pairs: &[(&str, &str)]) -> triage_classifiers::data_handling::PatientRecord {
    schema.record_from_pairs(pairs.iter().copied()).unwrap()
}

#[test]
fn test_study_scores_high_and_low_risk_patients() {
    init_logging();
    let ds = simulate_cohort(700, 2024);
    let config = small_config();
    let outcome = Study::run(&ds, &config).unwrap();
    let report = &outcome.report;

    assert_eq!(outcome.bundles.len(), 3);
    assert_eq!(report.evaluations.len(), 3);
    assert_eq!(report.comparisons.len(), 3);
    assert_eq!(report.n_train + report.n_test, ds.len());
    let overall = ds.full_partition().prevalence(&ds);
    assert!((report.prevalence_train - overall).abs() <= 0.01);
    assert!((report.prevalence_test - overall).abs() <= 0.01);
    for evaluation in &report.evaluations {
        let auc = evaluation.auc.value.unwrap();
        assert!(auc > 0.7, "{} AUC {}", evaluation.family, auc);
        assert!(evaluation.auc.lower.unwrap() <= auc && auc <= evaluation.auc.upper.unwrap());
    }
    assert_eq!(report.consensus.entries.len(), ds.schema().len());
    assert!(report.consensus.entries[..2]
        .iter()
        .any(|e| e.attribute == "severity"));

    let schema = ds.schema();
    let high = patient(
        schema,
        &[
            ("age", "75"),
            ("sex", "male"),
            ("severity", "severe"),
            ("dyspnea", "yes"),
            ("headache", "no"),
            ("albumin", "2.5"),
            ("platelets", "150000"),
            ("bilirubin", "2.0"),
        ],
    );
    let low = patient(
        schema,
        &[
            ("age", "35"),
            ("sex", "female"),
            ("severity", "mild"),
            ("dyspnea", "no"),
            ("headache", "yes"),
            ("albumin", "4.2"),
            ("platelets", "250000"),
            ("bilirubin", "0.8"),
        ],
    );

    for family in ModelFamily::ALL {
        let bundle = outcome.bundle(family).unwrap();
        let p_high = bundle.predict(&high).unwrap();
        let p_low = bundle.predict(&low).unwrap();
        assert!(p_high > 0.5, "{}: high-risk probability {}", family, p_high);
        assert!(p_low < 0.3, "{}: low-risk probability {}", family, p_low);
        assert!(bundle.classify(&high).unwrap() || bundle.threshold() > p_high);

        let explained_high = bundle.explain(&high).unwrap();
        let explained_low = bundle.explain(&low).unwrap();
        let severity_high = explained_high.get("severity").unwrap();
        let severity_low = explained_low.get("severity").unwrap();
        assert!(severity_high > 0.0, "{}: severity {}", family, severity_high);
        assert!(severity_low <= 0.0, "{}: severity {}", family, severity_low);
        for (set, p) in [(&explained_high, p_high), (&explained_low, p_low)] {
            let gap = set.additivity_gap();
            assert!(gap.abs() < 1e-9, "{}: additivity gap {}", family, gap);
            assert!((set.prediction - p).abs() < 1e-9, "{}", family);
        }

        // A restored bundle needs no training data and scores identically.
        let json = bundle.to_json().unwrap();
        let restored = ModelBundle::from_json(&json, schema).unwrap();
        assert_eq!(restored.family(), family);
        assert_eq!(restored.threshold(), bundle.threshold());
        assert_eq!(restored.predict(&high).unwrap(), p_high, "{}", family);
        assert_eq!(restored.predict(&low).unwrap(), p_low, "{}", family);
        assert_eq!(restored.explain(&high).unwrap(), explained_high, "{}", family);
    }
}

#[test]
fn test_removing_severity_lowers_auc() {
    init_logging();
    let ds = simulate_cohort(700, 99);
    let mut config = small_config();
    config.families = vec![ModelFamily::BaggedTrees];
    let ablation = Study::ablation(&ds, &config, ModelFamily::BaggedTrees, "severity").unwrap();
    assert!(
        ablation.ablated_auc < ablation.full_auc,
        "full {} vs ablated {}",
        ablation.full_auc,
        ablation.ablated_auc
    );
}

#[test]
fn test_unknown_ablation_attribute_is_rejected() {
    let ds = simulate_cohort(200, 1);
    assert!(Study::ablation(&ds, &small_config(), ModelFamily::BaggedTrees, "lactate").is_err());
}
