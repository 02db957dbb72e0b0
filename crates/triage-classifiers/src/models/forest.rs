//! Bagged CART classification trees (random forest).
//!
//! Each tree is grown on a bootstrap sample with `mtry` candidate features per
//! split and Gini impurity; its leaves store the fraction of deceased
//! patients. Trees are grown in parallel from per-tree seeds derived from the
//! forest seed, so the ensemble does not depend on thread scheduling.

use ndarray::Array2;
use rand::seq::index::sample;
use rand::Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::models::classifier_trait::{check_training_input, checked_probabilities, ClassifierModel};
use crate::rng::{task_rng, Stream};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        positive_fraction: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { positive_fraction } => return *positive_fraction,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GrowParams {
    mtry: usize,
    min_samples_leaf: usize,
    max_depth: Option<usize>,
}

struct Grower<'a, R: Rng> {
    x: &'a Array2<f64>,
    y: &'a [bool],
    params: GrowParams,
    rng: R,
    nodes: Vec<Node>,
    importance: Vec<f64>,
}

fn gini(positives: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let p = positives / total;
    2.0 * p * (1.0 - p)
}

impl<'a, R: Rng> Grower<'a, R> {
    fn leaf(&mut self, samples: &[usize]) -> usize {
        let positives = samples.iter().filter(|&&i| self.y[i]).count();
        self.nodes.push(Node::Leaf {
            positive_fraction: positives as f64 / samples.len().max(1) as f64,
        });
        self.nodes.len() - 1
    }

    /// Best (feature, threshold, impurity decrease) among `mtry` random features.
    fn best_split(&mut self, samples: &[usize]) -> Option<(usize, f64, f64)> {
        let n = samples.len();
        let n_features = self.x.ncols();
        let total_pos = samples.iter().filter(|&&i| self.y[i]).count() as f64;
        let parent = n as f64 * gini(total_pos, n as f64);
        let min_leaf = self.params.min_samples_leaf;

        let candidates = sample(&mut self.rng, n_features, self.params.mtry.min(n_features));
        let mut best: Option<(usize, f64, f64)> = None;
        for feature in candidates.iter() {
            let mut order: Vec<(f64, bool)> = samples
                .iter()
                .map(|&i| (self.x[(i, feature)], self.y[i]))
                .collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0.0;
            for split in 1..n {
                if order[split - 1].1 {
                    left_pos += 1.0;
                }
                if split < min_leaf || n - split < min_leaf {
                    continue;
                }
                if order[split - 1].0 == order[split].0 {
                    continue;
                }
                let nl = split as f64;
                let nr = (n - split) as f64;
                let child = nl * gini(left_pos, nl) + nr * gini(total_pos - left_pos, nr);
                let decrease = parent - child;
                if decrease > 1e-12 && best.map_or(true, |(_, _, d)| decrease > d) {
                    let threshold = 0.5 * (order[split - 1].0 + order[split].0);
                    best = Some((feature, threshold, decrease));
                }
            }
        }
        best
    }

    fn grow(&mut self, samples: &[usize], depth: usize) -> usize {
        let n = samples.len();
        let positives = samples.iter().filter(|&&i| self.y[i]).count();
        let pure = positives == 0 || positives == n;
        let depth_reached = self.params.max_depth.map_or(false, |d| depth >= d);
        if pure || depth_reached || n < 2 * self.params.min_samples_leaf {
            return self.leaf(samples);
        }
        let Some((feature, threshold, decrease)) = self.best_split(samples) else {
            return self.leaf(samples);
        };
        self.importance[feature] += decrease;

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.x[(i, feature)] <= threshold);

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            positive_fraction: 0.0,
        });
        let left_idx = self.grow(&left, depth + 1);
        let right_idx = self.grow(&right, depth + 1);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left: left_idx,
            right: right_idx,
        };
        idx
    }
}

/// Random forest classifier over a recipe design matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaggedTreeClassifier {
    n_trees: usize,
    mtry: usize,
    min_samples_leaf: usize,
    max_depth: Option<usize>,
    seed: u64,
    trees: Vec<Tree>,
    n_features: usize,
    importances: Vec<f64>,
}

impl BaggedTreeClassifier {
    pub fn new(
        n_trees: usize,
        mtry: usize,
        min_samples_leaf: usize,
        max_depth: Option<usize>,
        seed: u64,
    ) -> Self {
        BaggedTreeClassifier {
            n_trees,
            mtry,
            min_samples_leaf,
            max_depth,
            seed,
            trees: Vec::new(),
            n_features: 0,
            importances: Vec::new(),
        }
    }

    /// Mean decrease in Gini impurity per design column, normalised to sum to 1.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

impl ClassifierModel for BaggedTreeClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[bool]) -> Result<(), ModelError> {
        check_training_input(self.name(), x, y)?;
        if self.n_trees == 0 || self.min_samples_leaf == 0 {
            return Err(ModelError::config(
                "bagged trees need at least one tree and one sample per leaf",
            ));
        }
        let n = x.nrows();
        let params = GrowParams {
            mtry: self.mtry.clamp(1, x.ncols()),
            min_samples_leaf: self.min_samples_leaf,
            max_depth: self.max_depth,
        };

        let grown: Vec<(Tree, Vec<f64>)> = (0..self.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = task_rng(self.seed, Stream::Estimator, t as u64);
                let bag: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut grower = Grower {
                    x,
                    y,
                    params,
                    rng,
                    nodes: Vec::new(),
                    importance: vec![0.0; x.ncols()],
                };
                grower.grow(&bag, 0);
                (
                    Tree {
                        nodes: grower.nodes,
                    },
                    grower.importance,
                )
            })
            .collect();

        let mut importances = vec![0.0; x.ncols()];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, imp) in grown {
            for (total, v) in importances.iter_mut().zip(imp) {
                *total += v;
            }
            trees.push(tree);
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }

        log::trace!(
            "Grew {} trees (mtry={}, min_samples_leaf={})",
            trees.len(),
            params.mtry,
            params.min_samples_leaf
        );
        self.trees = trees;
        self.n_features = x.ncols();
        self.importances = importances;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::non_convergence(self.name(), "model is not fitted"));
        }
        if x.ncols() != self.n_features {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features,
                got: x.ncols(),
            });
        }
        let n_trees = self.trees.len() as f64;
        let raw = x.rows().into_iter().map(|row| {
            let row = row.to_vec();
            self.trees.iter().map(|t| t.predict_row(&row)).sum::<f64>() / n_trees
        });
        checked_probabilities(self.name(), raw)
    }

    fn name(&self) -> &str {
        "bagged_trees"
    }
}
