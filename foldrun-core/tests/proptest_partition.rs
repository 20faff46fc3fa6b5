//! Property-based tests for the partitioner using proptest.

use proptest::prelude::*;

use foldrun_core::data::{Attribute, ClassAttribute, Dataset, DatasetSchema, Instance, Value};
use foldrun_core::experiment::partition::{folds_to_partitions, make_folds, make_split};

fn dataset(labels: &[usize]) -> Dataset {
    let schema = DatasetSchema::new(
        vec![Attribute::numeric("x")],
        ClassAttribute {
            name: "class".into(),
            labels: vec!["a".into(), "b".into(), "c".into()],
        },
    );
    let instances = labels
        .iter()
        .enumerate()
        .map(|(i, &l)| Instance::new(vec![Value::Numeric(i as f64)], Some(l)))
        .collect();
    Dataset::new("prop", schema, instances).unwrap()
}

fn labels_and_k() -> impl Strategy<Value = (Vec<usize>, usize)> {
    prop::collection::vec(0usize..3, 2..120).prop_flat_map(|labels| {
        let n = labels.len();
        (Just(labels), 2..=n)
    })
}

// --- Cross-validation folds ---

proptest! {
    #[test]
    fn folds_partition_every_index(
        (labels, k) in labels_and_k(),
        seed in any::<u64>(),
        stratified in any::<bool>(),
    ) {
        let ds = dataset(&labels);
        let folds = make_folds(&ds, k, seed, stratified).unwrap();
        prop_assert_eq!(folds.len(), k);

        let mut all: Vec<usize> = folds.concat();
        all.sort_unstable();
        prop_assert_eq!(all, (0..labels.len()).collect::<Vec<_>>());
    }

    #[test]
    fn fold_sizes_differ_by_at_most_one(
        (labels, k) in labels_and_k(),
        seed in any::<u64>(),
        stratified in any::<bool>(),
    ) {
        let ds = dataset(&labels);
        let folds = make_folds(&ds, k, seed, stratified).unwrap();
        let max = folds.iter().map(Vec::len).max().unwrap();
        let min = folds.iter().map(Vec::len).min().unwrap();
        prop_assert!(max - min <= 1);
    }

    #[test]
    fn folds_are_deterministic(
        (labels, k) in labels_and_k(),
        seed in any::<u64>(),
        stratified in any::<bool>(),
    ) {
        let ds = dataset(&labels);
        prop_assert_eq!(
            make_folds(&ds, k, seed, stratified).unwrap(),
            make_folds(&ds, k, seed, stratified).unwrap()
        );
    }

    #[test]
    fn train_and_test_are_disjoint_complements(
        (labels, k) in labels_and_k(),
        seed in any::<u64>(),
    ) {
        let ds = dataset(&labels);
        let n = labels.len();
        let folds = make_folds(&ds, k, seed, true).unwrap();
        for p in folds_to_partitions(&folds, n) {
            prop_assert_eq!(p.train.len() + p.test.len(), n);
            prop_assert!(p.test.iter().all(|i| !p.train.contains(i)));
        }
    }
}

// --- Percentage split ---

proptest! {
    #[test]
    fn split_sizes_sum_to_n(
        labels in prop::collection::vec(0usize..3, 2..200),
        percentage in 0.01f64..0.99,
        seed in any::<u64>(),
        randomized in any::<bool>(),
    ) {
        let ds = dataset(&labels);
        let n = labels.len();
        let expected_train = (n as f64 * percentage).floor() as usize;
        match make_split(&ds, percentage, seed, randomized) {
            Ok(split) => {
                prop_assert_eq!(split.train.len(), expected_train);
                prop_assert_eq!(split.train.len() + split.test.len(), n);
                let mut all = [split.train.clone(), split.test].concat();
                all.sort_unstable();
                prop_assert_eq!(all, (0..n).collect::<Vec<_>>());
            }
            // Only an empty side is rejected
            Err(_) => prop_assert!(expected_train == 0 || expected_train == n),
        }
    }

    #[test]
    fn unrandomized_split_keeps_dataset_order(
        labels in prop::collection::vec(0usize..3, 4..100),
        percentage in 0.25f64..0.75,
    ) {
        let ds = dataset(&labels);
        let split = make_split(&ds, percentage, 1, false).unwrap();
        let train_size = split.train.len();
        prop_assert_eq!(split.train, (0..train_size).collect::<Vec<_>>());
        prop_assert_eq!(split.test, (train_size..labels.len()).collect::<Vec<_>>());
    }
}
