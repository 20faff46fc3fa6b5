//! Train/test partitioning: k-fold cross-validation and percentage splits.
//!
//! All randomness comes from a `StdRng` seeded by the caller, so identical
//! inputs always yield identical partitions.

use super::spec::{MAX_RUNS, SplitStrategy};
use crate::data::Dataset;
use crate::error::ExperimentError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A pair of disjoint index sets over one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partitions of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRun {
    pub run: usize,
    pub seed: u64,
    pub partitions: Vec<Partition>,
}

/// Every partition of an experiment, computed before any training starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub strategy: SplitStrategy,
    pub runs: Vec<PlannedRun>,
}

impl PartitionPlan {
    /// Total number of partitions across all runs.
    pub fn len(&self) -> usize {
        self.runs.iter().map(|r| r.partitions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(run, fold, partition)` in run-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &Partition)> {
        self.runs.iter().flat_map(|r| {
            r.partitions
                .iter()
                .enumerate()
                .map(move |(fold, p)| (r.run, fold, p))
        })
    }

    pub fn get(&self, run: usize, fold: usize) -> Option<&Partition> {
        self.runs.get(run).and_then(|r| r.partitions.get(fold))
    }
}

fn shuffled_indices(n: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices
}

/// Split `0..n` into `k` disjoint test folds whose sizes differ by at most one.
///
/// Plain folds are contiguous chunks of the shuffled order, larger chunks
/// first. Stratified folds stable-sort the shuffled order by class and deal
/// instances round-robin, so each fold sees roughly the overall class mix.
pub fn make_folds(
    dataset: &Dataset,
    k: usize,
    seed: u64,
    stratified: bool,
) -> Result<Vec<Vec<usize>>, ExperimentError> {
    let n = dataset.len();
    if k < 2 {
        return Err(ExperimentError::partition(format!(
            "number of folds must be at least 2, got {k}"
        )));
    }
    if k > n {
        return Err(ExperimentError::partition(format!(
            "cannot make {k} folds from {n} instances"
        )));
    }

    let mut order = shuffled_indices(n, seed);
    let mut folds: Vec<Vec<usize>> = vec![Vec::with_capacity(n / k + 1); k];

    if stratified {
        let instances = dataset.instances();
        order.sort_by_key(|&i| instances[i].label.unwrap_or(usize::MAX));
        for (pos, idx) in order.into_iter().enumerate() {
            folds[pos % k].push(idx);
        }
    } else {
        let base = n / k;
        let remainder = n % k;
        let mut start = 0;
        for (f, fold) in folds.iter_mut().enumerate() {
            let size = if f < remainder { base + 1 } else { base };
            fold.extend_from_slice(&order[start..start + size]);
            start += size;
        }
    }

    tracing::debug!(k, seed, stratified, n, "Built folds");
    Ok(folds)
}

/// Turn test folds into partitions; each train side is the complement, ascending.
pub fn folds_to_partitions(folds: &[Vec<usize>], n: usize) -> Vec<Partition> {
    folds
        .iter()
        .map(|test| {
            let mut in_test = vec![false; n];
            for &i in test {
                in_test[i] = true;
            }
            Partition {
                train: (0..n).filter(|&i| !in_test[i]).collect(),
                test: test.clone(),
            }
        })
        .collect()
}

/// Single train/test split with `floor(n * percentage)` training instances.
///
/// Without `randomized` the dataset order is kept, so the first instances
/// train and the last ones test.
pub fn make_split(
    dataset: &Dataset,
    percentage: f64,
    seed: u64,
    randomized: bool,
) -> Result<Partition, ExperimentError> {
    if !(percentage > 0.0 && percentage < 1.0) {
        return Err(ExperimentError::configuration(format!(
            "percentage must be strictly between 0 and 1, got {percentage}"
        )));
    }
    let n = dataset.len();
    let train_size = (n as f64 * percentage).floor() as usize;
    if train_size == 0 || train_size >= n {
        return Err(ExperimentError::partition(format!(
            "a {percentage} split of {n} instances leaves an empty side"
        )));
    }

    let order = if randomized {
        shuffled_indices(n, seed)
    } else {
        (0..n).collect()
    };
    let (train, test) = order.split_at(train_size);
    Ok(Partition {
        train: train.to_vec(),
        test: test.to_vec(),
    })
}

/// Precompute the partitions of every run; run `r` uses seed `seed + r`.
pub fn plan(
    dataset: &Dataset,
    strategy: SplitStrategy,
    seed: u64,
    runs: usize,
) -> Result<PartitionPlan, ExperimentError> {
    if runs > MAX_RUNS {
        return Err(ExperimentError::configuration(format!(
            "{runs} runs requested, at most {MAX_RUNS} allowed"
        )));
    }
    let mut planned = Vec::new();
    for run in 0..runs {
        let run_seed = seed.wrapping_add(run as u64);
        let partitions = match strategy {
            SplitStrategy::CrossValidation { folds, stratified } => {
                let folds = make_folds(dataset, folds, run_seed, stratified)?;
                folds_to_partitions(&folds, dataset.len())
            }
            SplitStrategy::Percentage {
                percentage,
                randomized,
            } => vec![make_split(dataset, percentage, run_seed, randomized)?],
        };
        planned.push(PlannedRun {
            run,
            seed: run_seed,
            partitions,
        });
    }
    Ok(PartitionPlan {
        strategy,
        runs: planned,
    })
}
