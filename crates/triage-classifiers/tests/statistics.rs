use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use triage_classifiers::config::ModelFamily;
use triage_classifiers::stats::compare::{evaluate, EvaluationSettings};
use triage_classifiers::stats::delong::delong_test;
use triage_classifiers::threshold::youden_threshold;

fn scored_cohort(n: usize, seed: u64) -> (Vec<f64>, Vec<f64>, Vec<bool>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let labels: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.3)).collect();
    let strong = labels
        .iter()
        .map(|&l| (if l { 0.6 } else { 0.4 }) + 0.5 * (rng.gen::<f64>() - 0.5))
        .collect();
    let weak = labels
        .iter()
        .map(|&l| (if l { 0.52 } else { 0.48 }) + 0.5 * (rng.gen::<f64>() - 0.5))
        .collect();
    (strong, weak, labels)
}

#[test]
fn test_delong_is_antisymmetric() {
    let (a, b, labels) = scored_cohort(250, 1);
    let ab = delong_test(&a, &b, &labels).unwrap();
    let ba = delong_test(&b, &a, &labels).unwrap();
    assert_eq!(ab.z, -ba.z);
    assert_eq!(ab.p_value, ba.p_value);
    assert_eq!(ab.auc_a, ba.auc_b);
    assert_eq!(ab.difference, -ba.difference);
    assert!(ab.p_value < 0.05);
}

#[test]
fn test_bootstrap_is_identical_across_thread_counts() {
    let (scores, _, labels) = scored_cohort(200, 2);
    let settings = EvaluationSettings {
        bootstrap_iterations: 300,
        ..Default::default()
    };
    let run = |threads: usize| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
            .install(|| {
                evaluate(ModelFamily::BoostedTrees, &scores, &labels, 0.5, &settings, 77).unwrap()
            })
    };
    let single = run(1);
    assert_eq!(single, run(3));
    assert_eq!(single, run(8));

    let other_seed = evaluate(ModelFamily::BoostedTrees, &scores, &labels, 0.5, &settings, 78)
        .unwrap();
    assert_ne!(single.auc.lower, other_seed.auc.lower);
}

#[test]
fn test_threshold_uses_only_given_scores() {
    let (scores, _, labels) = scored_cohort(300, 3);
    let point = youden_threshold(&scores, &labels).unwrap();
    assert!(scores.contains(&point.threshold));
    assert!(point.youden_j > 0.0);
    assert!((point.sensitivity + point.specificity - 1.0 - point.youden_j).abs() < 1e-12);
}
