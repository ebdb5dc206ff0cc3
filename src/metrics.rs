//! Binary classification metrics and the per-class report.
//!
//! Scores are positive-class probabilities. [`predict_classes`] maps a score
//! strictly above 0.5 to class 1; [`round_classes`] rounds to the nearest
//! class with 0.5 going to class 1. Precision, recall and F1 are computed for
//! class 1 and are 0 when their denominator is 0.

use std::fmt;

/// Score threshold above which a row is assigned class 1.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Threshold scores into class labels.
#[must_use]
pub fn predict_classes(scores: &[f64]) -> Vec<u8> {
    scores.iter().map(|&s| u8::from(s > DECISION_THRESHOLD)).collect()
}

/// Round scores to the nearest class, halves up.
#[must_use]
pub fn round_classes(scores: &[f64]) -> Vec<u8> {
    scores.iter().map(|&s| u8::from(s >= DECISION_THRESHOLD)).collect()
}

/// `(tp, fp, fn)` counts for `class`.
fn counts(y_true: &[u8], y_pred: &[u8], class: u8) -> (usize, usize, usize) {
    debug_assert_eq!(y_true.len(), y_pred.len());
    let mut tp = 0;
    let mut fp = 0;
    let mut fn_ = 0;
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == class, p == class) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    (tp, fp, fn_)
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn harmonic(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Precision of class 1.
#[must_use]
pub fn precision(y_true: &[u8], y_pred: &[u8]) -> f64 {
    let (tp, fp, _) = counts(y_true, y_pred, 1);
    ratio(tp, tp + fp)
}

/// Recall of class 1.
#[must_use]
pub fn recall(y_true: &[u8], y_pred: &[u8]) -> f64 {
    let (tp, _, fn_) = counts(y_true, y_pred, 1);
    ratio(tp, tp + fn_)
}

/// F1 score of class 1.
#[must_use]
pub fn f1(y_true: &[u8], y_pred: &[u8]) -> f64 {
    harmonic(precision(y_true, y_pred), recall(y_true, y_pred))
}

/// Area under the ROC curve from raw scores.
///
/// Uses the rank-sum (Mann-Whitney U) form with tied scores sharing their
/// average rank. Returns 0.5 when only one class is present.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> f64 {
    debug_assert_eq!(y_true.len(), scores.len());
    let n_pos = y_true.iter().filter(|&&l| l == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1..=end share their mean
        let shared = (start + 1 + end) as f64 / 2.0;
        let positives = order[start..end].iter().filter(|&&i| y_true[i] == 1).count();
        positive_rank_sum += shared * positives as f64;
        start = end;
    }

    let u = positive_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    u / (n_pos as f64 * n_neg as f64)
}

/// Precision, recall, F1 and support of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    /// Display name
    pub name: String,
    /// Precision
    pub precision: f64,
    /// Recall
    pub recall: f64,
    /// F1 score
    pub f1: f64,
    /// Number of true rows of this class
    pub support: usize,
}

/// Unweighted and support-weighted averages over classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragedMetrics {
    /// Averaged precision
    pub precision: f64,
    /// Averaged recall
    pub recall: f64,
    /// Averaged F1
    pub f1: f64,
}

/// Per-class metrics for a binary problem, printed in the familiar
/// `precision / recall / f1-score / support` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    classes: [ClassMetrics; 2],
    accuracy: f64,
    macro_avg: AveragedMetrics,
    weighted_avg: AveragedMetrics,
    total: usize,
}

impl ClassificationReport {
    /// Metrics of the class called `name`.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassMetrics> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Both classes, label 0 first.
    #[must_use]
    pub const fn classes(&self) -> &[ClassMetrics; 2] {
        &self.classes
    }

    /// Fraction of correct predictions.
    #[must_use]
    pub const fn accuracy(&self) -> f64 {
        self.accuracy
    }

    /// Unweighted mean over classes.
    #[must_use]
    pub const fn macro_avg(&self) -> AveragedMetrics {
        self.macro_avg
    }

    /// Support-weighted mean over classes.
    #[must_use]
    pub const fn weighted_avg(&self) -> AveragedMetrics {
        self.weighted_avg
    }

    /// Number of rows evaluated.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }
}

/// Build the report for labels `0`/`1` named `target_names[0]`/`[1]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn classification_report(
    y_true: &[u8],
    y_pred: &[u8],
    target_names: [&str; 2],
) -> ClassificationReport {
    let class = |label: u8| {
        let (tp, fp, fn_) = counts(y_true, y_pred, label);
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        ClassMetrics {
            name: target_names[usize::from(label)].to_string(),
            precision,
            recall,
            f1: harmonic(precision, recall),
            support: tp + fn_,
        }
    };
    let classes = [class(0), class(1)];
    let total = y_true.len();

    let macro_avg = AveragedMetrics {
        precision: (classes[0].precision + classes[1].precision) / 2.0,
        recall: (classes[0].recall + classes[1].recall) / 2.0,
        f1: (classes[0].f1 + classes[1].f1) / 2.0,
    };
    let weigh = |f: fn(&ClassMetrics) -> f64| {
        if total == 0 {
            0.0
        } else {
            classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total as f64
        }
    };
    let weighted_avg = AveragedMetrics {
        precision: weigh(|c| c.precision),
        recall: weigh(|c| c.recall),
        f1: weigh(|c| c.f1),
    };
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();

    ClassificationReport {
        classes,
        accuracy: ratio(correct, total),
        macro_avg,
        weighted_avg,
        total,
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.name.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total
        )?;
        for (label, avg) in [("macro avg", self.macro_avg), ("weighted avg", self.weighted_avg)] {
            writeln!(
                f,
                "{label:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                avg.precision, avg.recall, avg.f1, self.total
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_strict() {
        assert_eq!(predict_classes(&[0.2, 0.5, 0.51, 0.9]), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_rounding_sends_half_up() {
        assert_eq!(round_classes(&[0.2, 0.49, 0.5, 0.9]), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_precision_recall_f1() {
        let y_true = [1, 1, 1, 0, 0];
        let y_pred = [1, 1, 0, 1, 0];
        assert!((precision(&y_true, &y_pred) - 2.0 / 3.0).abs() < 1e-12);
        assert!((recall(&y_true, &y_pred) - 2.0 / 3.0).abs() < 1e-12);
        assert!((f1(&y_true, &y_pred) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_is_zero() {
        assert!(precision(&[1, 0], &[0, 0]).abs() < f64::EPSILON);
        assert!(f1(&[0, 0], &[0, 0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let y = [0, 0, 1, 1];
        assert!((roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]) - 1.0).abs() < 1e-12);
        assert!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]).abs() < 1e-12);
    }

    #[test]
    fn test_auc_ties_count_half() {
        let y = [0, 1];
        assert!((roc_auc(&y, &[0.5, 0.5]) - 0.5).abs() < 1e-12);
        // one positive above both negatives, one tied with a negative
        let y = [0, 0, 1, 1];
        assert!((roc_auc(&y, &[0.3, 0.6, 0.6, 0.9]) - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class() {
        assert!((roc_auc(&[1, 1], &[0.3, 0.4]) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_all_positive() {
        let y_true = [0, 0, 1, 1, 1];
        let report = classification_report(&y_true, &[1; 5], ["DGA", "Legit"]);
        let legit = report.class("Legit").unwrap();
        assert!((legit.recall - 1.0).abs() < f64::EPSILON);
        assert!((legit.precision - 0.6).abs() < 1e-12);
        assert_eq!(legit.support, 3);
        let dga = report.class("DGA").unwrap();
        assert!(dga.recall.abs() < f64::EPSILON);
        assert!((report.accuracy() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_report_layout() {
        let report = classification_report(&[0, 1], &[0, 1], ["DGA", "Legit"]);
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "             precision    recall  f1-score   support");
        assert_eq!(lines[2], "         DGA      1.00      1.00      1.00         1");
        assert!(lines[5].trim_start().starts_with("accuracy"));
        assert!(lines[7].starts_with("weighted avg"));
    }
}
