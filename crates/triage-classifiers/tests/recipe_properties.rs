use triage_classifiers::partition::Partitioner;
use triage_classifiers::preprocessing::{Recipe, RecipeOptions};
use triage_classifiers::synthetic::simulate_cohort;

fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

#[test]
fn test_apply_is_idempotent() {
    let ds = simulate_cohort(300, 5);
    let (train, test) = Partitioner::new(1)
        .train_test_split(&ds, &ds.full_partition(), 0.8)
        .unwrap();
    let (fitted, _) = Recipe::new(RecipeOptions::default())
        .fit(&ds, &train, 1)
        .unwrap();

    let first = fitted.apply(&ds, &test).unwrap();
    let second = fitted.apply(&ds, &test).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.x.nrows(), test.len());
    assert_eq!(first.feature_names, fitted.feature_names());
}

#[test]
fn test_standardization_is_fitted_per_fold() {
    let ds = simulate_cohort(400, 8);
    let all = ds.full_partition();
    let folds = Partitioner::new(2).stratified_folds(&ds, &all, 4).unwrap();
    let options = RecipeOptions {
        oversampling: None,
        ..Default::default()
    };

    let mut age_means = Vec::new();
    for fold in &folds {
        let (fitted, _) = Recipe::new(options.clone()).fit(&ds, &fold.train, 3).unwrap();
        let design = fitted.apply(&ds, &fold.train).unwrap();
        let scaler = fitted.scaler();
        assert!(!scaler.columns.is_empty());
        for name in &scaler.columns {
            let values = design.column(name).unwrap();
            let (mean, sd) = mean_sd(&values);
            assert!(mean.abs() < 1e-9, "fold {} column {} mean {}", fold.index, name, mean);
            assert!((sd - 1.0).abs() < 1e-9, "fold {} column {} sd {}", fold.index, name, sd);
        }
        let age = scaler.columns.iter().position(|c| c == "age").unwrap();
        age_means.push(scaler.mean[age]);
    }
    // Each fold learned its own location.
    for pair in age_means.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[test]
fn test_held_out_rows_are_not_standardized_exactly() {
    let ds = simulate_cohort(400, 21);
    let folds = Partitioner::new(4)
        .stratified_folds(&ds, &ds.full_partition(), 3)
        .unwrap();
    let (fitted, _) = Recipe::new(RecipeOptions::default())
        .fit(&ds, &folds[0].train, 0)
        .unwrap();
    let validation = fitted.apply(&ds, &folds[0].validation).unwrap();
    let (mean, _) = mean_sd(&validation.column("age").unwrap());
    assert!(mean.abs() > 1e-9);
}

#[test]
fn test_stratified_split_keeps_prevalence() {
    let ds = simulate_cohort(1000, 33);
    let all = ds.full_partition();
    let overall = all.prevalence(&ds);
    let partitioner = Partitioner::new(12);
    let (train, test) = partitioner.train_test_split(&ds, &all, 0.8).unwrap();
    assert!((train.prevalence(&ds) - overall).abs() <= 0.01);
    assert!((test.prevalence(&ds) - overall).abs() <= 0.01);

    for fold in partitioner.stratified_folds(&ds, &train, 5).unwrap() {
        assert!((fold.validation.prevalence(&ds) - overall).abs() <= 0.01);
        assert!((fold.train.prevalence(&ds) - overall).abs() <= 0.01);
    }
}
