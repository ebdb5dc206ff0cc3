//! Property-based tests for dga-nn
//!
//! - Fold and split partitions
//! - Metric invariants
//! - Metric documents and standardization
//! - Run with ProptestConfig::with_cases(100)

use std::collections::BTreeMap;

use dga_nn::dataset::{train_test_split, Dataset, FeatureMatrix, StratifiedKFold};
use dga_nn::experiment::MetricRecord;
use dga_nn::metrics::{f1, precision, predict_classes, recall, roc_auc};
use dga_nn::pipeline::StandardScaler;
use dga_nn::sampler::Sampler;
use proptest::prelude::*;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Binary labels with at least one row of each class.
fn arb_labels(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(0u8..=1, 2..max_len).prop_filter("both classes", |labels| {
        labels.contains(&0) && labels.contains(&1)
    })
}

/// Labels with matching scores in `[0, 1]`.
fn arb_scored(max_len: usize) -> impl Strategy<Value = (Vec<u8>, Vec<f64>)> {
    arb_labels(max_len).prop_flat_map(|labels| {
        let n = labels.len();
        (Just(labels), proptest::collection::vec(0.0f64..=1.0, n))
    })
}

/// Metric map with equally long, finite sequences.
fn arb_metrics() -> impl Strategy<Value = BTreeMap<String, Vec<f64>>> {
    (1usize..12).prop_flat_map(|folds| {
        proptest::collection::btree_map(
            "[a-z_]{1,12}",
            proptest::collection::vec(-1.0e6f64..1.0e6, folds),
            1..8,
        )
    })
}

/// Row-major feature matrix with 2..30 rows and 1..6 columns.
fn arb_matrix() -> impl Strategy<Value = FeatureMatrix> {
    (2usize..30, 1usize..6).prop_flat_map(|(rows, cols)| {
        proptest::collection::vec(-100.0f64..100.0, rows * cols)
            .prop_map(move |data| FeatureMatrix::new(rows, cols, data).unwrap())
    })
}

fn count_class(labels: &[u8], rows: &[usize], class: u8) -> usize {
    rows.iter().filter(|&&r| labels[r] == class).count()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ========================================================================
    // Fold Assignment Properties
    // ========================================================================

    /// Property: held-out sets are disjoint and cover every row once
    #[test]
    fn prop_folds_partition_rows(
        labels in arb_labels(200),
        k in 2usize..=10,
        seed in any::<u64>()
    ) {
        prop_assume!(labels.len() >= k);
        let folds = StratifiedKFold::new(k).shuffled(Some(seed)).split(&labels).unwrap();
        prop_assert_eq!(folds.len(), k);

        let mut seen = vec![0usize; labels.len()];
        for fold in &folds {
            for &row in &fold.test {
                seen[row] += 1;
            }
            // train is the complement of test
            prop_assert_eq!(fold.train.len() + fold.test.len(), labels.len());
            prop_assert!(fold.train.iter().all(|r| fold.test.binary_search(r).is_err()));
        }
        prop_assert!(seen.iter().all(|&n| n == 1));
    }

    /// Property: every fold holds floor or ceil of n_c / k rows of class c
    #[test]
    fn prop_folds_are_stratified(
        labels in arb_labels(200),
        k in 2usize..=10,
        seed in any::<u64>()
    ) {
        prop_assume!(labels.len() >= k);
        let folds = StratifiedKFold::new(k).shuffled(Some(seed)).split(&labels).unwrap();
        for class in [0u8, 1] {
            let total = labels.iter().filter(|&&l| l == class).count();
            let (lo, hi) = (total / k, total.div_ceil(k));
            for fold in &folds {
                let n = count_class(&labels, &fold.test, class);
                prop_assert!(n >= lo && n <= hi, "class {} fold {}: {} not in [{}, {}]", class, fold.index, n, lo, hi);
            }
        }
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        let spread = sizes.iter().max().unwrap() - sizes.iter().min().unwrap();
        prop_assert!(spread <= 1);
    }

    /// Property: the same seed gives the same folds
    #[test]
    fn prop_folds_deterministic_under_seed(labels in arb_labels(100), seed in any::<u64>()) {
        prop_assume!(labels.len() >= 2);
        let splitter = StratifiedKFold::new(2).shuffled(Some(seed));
        prop_assert_eq!(splitter.split(&labels).unwrap(), splitter.split(&labels).unwrap());
    }

    /// Property: train/test split is a stratified partition
    #[test]
    fn prop_train_test_split_partitions(
        labels in arb_labels(200),
        fraction in 0.05f64..0.95,
        seed in any::<u64>()
    ) {
        let (train, test) = train_test_split(&labels, fraction, seed).unwrap();
        prop_assert_eq!(train.len() + test.len(), labels.len());
        prop_assert!(test.iter().all(|r| train.binary_search(r).is_err()));
        for class in [0u8, 1] {
            let total = labels.iter().filter(|&&l| l == class).count();
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let expected = (total as f64 * fraction).round() as usize;
            prop_assert_eq!(count_class(&labels, &test, class), expected);
        }
    }

    // ========================================================================
    // Metric Properties
    // ========================================================================

    /// Property: ROC AUC lies in [0, 1] and flips with the labels
    #[test]
    fn prop_roc_auc_bounded_and_antisymmetric((labels, scores) in arb_scored(100)) {
        let auc = roc_auc(&labels, &scores);
        prop_assert!((0.0..=1.0).contains(&auc));
        let flipped: Vec<u8> = labels.iter().map(|l| 1 - l).collect();
        prop_assert!((auc + roc_auc(&flipped, &scores) - 1.0).abs() < 1e-9);
    }

    /// Property: precision, recall and F1 are fractions, F1 between them
    #[test]
    fn prop_f1_between_precision_and_recall((labels, scores) in arb_scored(100)) {
        let predicted = predict_classes(&scores);
        let (p, r, f) = (precision(&labels, &predicted), recall(&labels, &predicted), f1(&labels, &predicted));
        for v in [p, r, f] {
            prop_assert!((0.0..=1.0).contains(&v));
        }
        prop_assert!(f <= p.max(r) + 1e-12);
        prop_assert!(f >= p.min(r) - 1e-12);
    }

    // ========================================================================
    // Data Integrity Properties
    // ========================================================================

    /// Property: metric documents survive a JSON round trip
    #[test]
    fn prop_metric_record_json_round_trip(metrics in arb_metrics()) {
        let record = MetricRecord::from_map(metrics).unwrap();
        let json = serde_json::to_string_pretty(&record).unwrap();
        let back: BTreeMap<String, Vec<f64>> = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(MetricRecord::from_map(back).unwrap(), record);
    }

    /// Property: standardized columns have zero mean
    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn prop_standardized_columns_are_centred(x in arb_matrix()) {
        let scaled = StandardScaler::fit(&x).unwrap().transform(&x).unwrap();
        for col in 0..x.cols() {
            let mean = scaled.iter_rows().map(|row| row[col]).sum::<f64>() / x.rows() as f64;
            prop_assert!(mean.abs() < 1e-9, "column {} mean {}", col, mean);
        }
    }

    /// Property: limiting a dataset keeps classes balanced
    #[test]
    fn prop_limit_is_balanced(labels in arb_labels(100), n in 1usize..100) {
        let rows = labels.len();
        let x = FeatureMatrix::new(rows, 1, vec![0.0; rows]).unwrap();
        let limited = Dataset::new(x, labels).unwrap().limit(Some(n));
        prop_assert!(limited.len() <= rows);
        if n < rows {
            prop_assert!(limited.len() <= n);
            let [neg, pos] = limited.class_counts();
            prop_assert!(neg <= n.div_ceil(2) && pos <= n.div_ceil(2));
        }
    }

    /// Property: sampled indices always carry probability mass
    #[test]
    fn prop_sampled_index_has_mass(
        probs in proptest::collection::vec(0.0f64..1.0, 1..10),
        temperature in 0.1f64..5.0,
        seed in any::<u64>()
    ) {
        prop_assume!(probs.iter().any(|&p| p > 0.0));
        let mut sampler = Sampler::new(seed).with_temperature(temperature).unwrap();
        let index = sampler.sample_index(&probs).unwrap();
        prop_assert!(probs[index] > 0.0);
    }
}
