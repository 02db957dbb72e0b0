//! Stratified splitting, K-fold assignment and bootstrap resampling.
//!
//! Every routine works on indices only and takes its seed explicitly.
use rand::seq::SliceRandom;
use rand::Rng;

use crate::data_handling::{Dataset, Partition};
use crate::error::ModelError;
use crate::rng::{task_rng, Stream};

/// One cross-validation fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub train: Partition,
    pub validation: Partition,
}

#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    seed: u64,
}

impl Partitioner {
    pub fn new(seed: u64) -> Self {
        Partitioner { seed }
    }

    /// Split `parent` into train and test partitions, stratified on outcome.
    ///
    /// Each class contributes `round(n_class * train_fraction)` records to the
    /// training side, so both sides keep the parent prevalence.
    pub fn train_test_split(
        &self,
        dataset: &Dataset,
        parent: &Partition,
        train_fraction: f64,
    ) -> Result<(Partition, Partition), ModelError> {
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(ModelError::config(format!(
                "train fraction must be in (0, 1), got {}",
                train_fraction
            )));
        }
        let strata = self.shuffled_strata(dataset, parent, Stream::Partition, 0);
        let mut train = Vec::new();
        let mut test = Vec::new();
        for (class, members) in strata.iter() {
            if members.len() < 2 {
                return Err(ModelError::InsufficientSamples {
                    class: *class,
                    count: members.len(),
                    required: 2,
                });
            }
            let n_train = ((members.len() as f64) * train_fraction).round() as usize;
            let n_train = n_train.clamp(1, members.len() - 1);
            train.extend_from_slice(&members[..n_train]);
            test.extend_from_slice(&members[n_train..]);
        }
        train.sort_unstable();
        test.sort_unstable();
        log::info!(
            "Split {} patients into {} train / {} test",
            parent.len(),
            train.len(),
            test.len()
        );
        Ok((Partition::new("train", train), Partition::new("test", test)))
    }

    /// Assign `parent` to `k` stratified folds.
    ///
    /// Records of each class are shuffled and dealt round-robin, so fold
    /// sizes per class differ by at most one.
    pub fn stratified_folds(
        &self,
        dataset: &Dataset,
        parent: &Partition,
        k: usize,
    ) -> Result<Vec<Fold>, ModelError> {
        if k < 2 {
            return Err(ModelError::config(format!("fold count must be at least 2, got {}", k)));
        }
        let strata = self.shuffled_strata(dataset, parent, Stream::Folds, k as u64);
        for (class, members) in strata.iter() {
            if members.len() < k {
                return Err(ModelError::InsufficientSamples {
                    class: *class,
                    count: members.len(),
                    required: k,
                });
            }
        }

        let mut assignment: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (_, members) in strata.iter() {
            for (i, &idx) in members.iter().enumerate() {
                assignment[i % k].push(idx);
            }
        }

        let folds = (0..k)
            .map(|f| {
                let mut validation = assignment[f].clone();
                validation.sort_unstable();
                let mut train: Vec<usize> = assignment
                    .iter()
                    .enumerate()
                    .filter(|(g, _)| *g != f)
                    .flat_map(|(_, members)| members.iter().copied())
                    .collect();
                train.sort_unstable();
                log::debug!(
                    "Fold {}: {} train / {} validation",
                    f + 1,
                    train.len(),
                    validation.len()
                );
                Fold {
                    index: f,
                    train: Partition::new(format!("fold-{}-train", f + 1), train),
                    validation: Partition::new(format!("fold-{}-validation", f + 1), validation),
                }
            })
            .collect();
        Ok(folds)
    }

    /// Stratified bootstrap resample of `parent` for iteration `iteration`.
    ///
    /// Draws with replacement within each class, keeping class counts fixed.
    pub fn bootstrap(
        &self,
        dataset: &Dataset,
        parent: &Partition,
        stream: Stream,
        iteration: u64,
    ) -> Partition {
        let positions = stratified_resample(
            &parent.labels(dataset),
            &mut task_rng(self.seed, stream, iteration),
        );
        parent.select(format!("bootstrap-{}", iteration + 1), &positions)
    }

    fn shuffled_strata(
        &self,
        dataset: &Dataset,
        parent: &Partition,
        stream: Stream,
        index: u64,
    ) -> [(bool, Vec<usize>); 2] {
        let mut rng = task_rng(self.seed, stream, index);
        let mut positives: Vec<usize> = parent
            .indices()
            .iter()
            .copied()
            .filter(|&i| dataset.outcome(i))
            .collect();
        let mut negatives: Vec<usize> = parent
            .indices()
            .iter()
            .copied()
            .filter(|&i| !dataset.outcome(i))
            .collect();
        positives.shuffle(&mut rng);
        negatives.shuffle(&mut rng);
        [(true, positives), (false, negatives)]
    }
}

/// Positions of a class-stratified resample with replacement of `labels`.
pub fn stratified_resample<R: Rng>(labels: &[bool], rng: &mut R) -> Vec<usize> {
    let positives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i]).collect();
    let negatives: Vec<usize> = (0..labels.len()).filter(|&i| !labels[i]).collect();
    let mut positions = Vec::with_capacity(labels.len());
    for members in [&positives, &negatives] {
        if members.is_empty() {
            continue;
        }
        for _ in 0..members.len() {
            positions.push(members[rng.gen_range(0..members.len())]);
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::simulate_cohort;

    #[test]
    fn split_preserves_prevalence() {
        let ds = simulate_cohort(500, 3);
        let all = ds.full_partition();
        for ratio in [0.5, 0.7, 0.8] {
            let (train, test) = Partitioner::new(9)
                .train_test_split(&ds, &all, ratio)
                .unwrap();
            assert_eq!(train.len() + test.len(), ds.len());
            let p = all.prevalence(&ds);
            assert!((train.prevalence(&ds) - p).abs() <= 0.01);
            assert!((test.prevalence(&ds) - p).abs() <= 0.01);
        }
    }

    #[test]
    fn folds_cover_partition_once() {
        let ds = simulate_cohort(300, 5);
        let all = ds.full_partition();
        let folds = Partitioner::new(1).stratified_folds(&ds, &all, 5).unwrap();
        let mut seen = vec![0usize; ds.len()];
        for fold in &folds {
            for &i in fold.validation.indices() {
                seen[i] += 1;
            }
            assert_eq!(fold.train.len() + fold.validation.len(), ds.len());
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn too_few_minority_records_is_rejected() {
        let ds = simulate_cohort(200, 5);
        let positives: Vec<usize> = (0..ds.len()).filter(|&i| ds.outcome(i)).take(3).collect();
        let negatives: Vec<usize> = (0..ds.len()).filter(|&i| !ds.outcome(i)).take(40).collect();
        let parent = Partition::new("small", [positives, negatives].concat());
        let err = Partitioner::new(1).stratified_folds(&ds, &parent, 5);
        assert!(matches!(
            err,
            Err(ModelError::InsufficientSamples { class: true, count: 3, required: 5 })
        ));
    }

    #[test]
    fn bootstrap_keeps_class_counts() {
        let ds = simulate_cohort(200, 2);
        let all = ds.full_partition();
        let p = Partitioner::new(4);
        let a = p.bootstrap(&ds, &all, Stream::Bootstrap, 0);
        let b = p.bootstrap(&ds, &all, Stream::Bootstrap, 0);
        assert_eq!(a, b);
        assert_eq!(a.len(), all.len());
        assert_eq!(
            a.labels(&ds).iter().filter(|&&y| y).count(),
            all.labels(&ds).iter().filter(|&&y| y).count()
        );
    }
}
