use ndarray::Array2;
use triage_classifiers::config::{ModelFamily, ModelType};
use triage_classifiers::models::classifier_trait::ClassifierModel;
use triage_classifiers::models::factory;

#[test]
fn test_factory_builds_and_predicts() {
    // tiny separable dataset
    let x = Array2::from_shape_vec(
        (8, 2),
        vec![
            1.0, 0.0, // died
            0.0, 1.0, // survived
            1.0, 0.1, // died
            0.0, 0.9, // survived
            1.1, 0.0, // died
            0.0, 1.2, // survived
            0.9, 0.2, // died
            0.1, 1.1, // survived
        ],
    )
    .expect("failed to create feature matrix");
    let y = vec![true, false, true, false, true, false, true, false];

    for family in ModelFamily::ALL {
        let model_type = match ModelType::default_for(family) {
            ModelType::BaggedTrees { .. } => ModelType::BaggedTrees {
                n_trees: 15,
                mtry: 2,
                min_samples_leaf: 1,
                max_depth: None,
            },
            ModelType::GBDT { .. } => ModelType::GBDT {
                max_depth: 3,
                num_boost_round: 5,
                learning_rate: 0.3,
                debug: false,
                training_optimization_level: 2,
                loss_type: "LogLikelyhood".to_string(),
            },
            other => other,
        };
        let mut model = factory::build_model(&model_type, 42);
        model.fit(&x, &y).unwrap();
        let probs = model.predict_proba(&x).unwrap();
        assert_eq!(probs.len(), x.nrows(), "{}", family);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)), "{}", family);
        if family != ModelFamily::KernelMachine {
            let died: f64 = probs.iter().step_by(2).sum::<f64>() / 4.0;
            let survived: f64 = probs.iter().skip(1).step_by(2).sum::<f64>() / 4.0;
            assert!(died > survived, "{}: {} vs {}", family, died, survived);
        }
    }
}
