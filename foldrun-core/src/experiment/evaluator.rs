//! Single-trial evaluation: train on one partition, test on its complement.

use super::partition::Partition;
use crate::classifiers::{ClassifierRegistry, ClassifierSpec, Model};
use crate::data::Dataset;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Which measures to compute per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSet {
    #[default]
    Classification,
    /// Classification measures plus mean absolute and root mean squared error.
    WithErrors,
}

/// Identifies one (classifier, run, fold) trial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub classifier: String,
    pub classifier_index: usize,
    pub run: usize,
    pub fold: usize,
}

impl RunKey {
    pub fn new(classifier: &str, classifier_index: usize, run: usize, fold: usize) -> Self {
        Self {
            classifier: classifier.to_string(),
            classifier_index,
            run,
            fold,
        }
    }

    /// Sort key: declaration position, then run, then fold.
    pub fn order(&self) -> (usize, usize, usize) {
        (self.classifier_index, self.run, self.fold)
    }
}

/// Counts of actual (row) versus predicted (column) classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

/// Per-class outcome counts and derived rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub label: String,
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tn: usize,
    pub precision: f64,
    pub recall: f64,
    pub f_measure: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn harmonic(p: f64, r: f64) -> f64 {
    if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
}

impl ConfusionMatrix {
    pub fn new(labels: Vec<String>) -> Self {
        let k = labels.len();
        Self {
            labels,
            counts: vec![vec![0; k]; k],
        }
    }

    pub fn record(&mut self, actual: usize, predicted: usize) {
        self.counts[actual][predicted] += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.counts.len()).map(|c| self.counts[c][c]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Number of test instances whose actual class is `class`.
    pub fn support(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    pub fn class_stats(&self, class: usize) -> ClassStats {
        let total = self.total();
        let tp = self.counts[class][class];
        let fn_ = self.support(class) - tp;
        let predicted: usize = self.counts.iter().map(|row| row[class]).sum();
        let fp = predicted - tp;
        let tn = total - tp - fn_ - fp;
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        ClassStats {
            label: self.labels[class].clone(),
            tp,
            fp,
            fn_,
            tn,
            precision,
            recall,
            f_measure: harmonic(precision, recall),
        }
    }

    /// Support-weighted `(precision, recall, f_measure)` across classes.
    pub fn weighted(&self, stats: &[ClassStats]) -> (f64, f64, f64) {
        let total = self.total();
        if total == 0 {
            return (0.0, 0.0, 0.0);
        }
        let mut acc = (0.0, 0.0, 0.0);
        for (c, s) in stats.iter().enumerate() {
            let w = self.support(c) as f64 / total as f64;
            acc.0 += w * s.precision;
            acc.1 += w * s.recall;
            acc.2 += w * s.f_measure;
        }
        acc
    }
}

/// Measures of one successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f_measure: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rmse: Option<f64>,
    pub correct: usize,
    pub incorrect: usize,
    pub per_class: Vec<ClassStats>,
    pub confusion: ConfusionMatrix,
}

impl Metrics {
    fn from_confusion(confusion: ConfusionMatrix, errors: Option<(f64, f64)>) -> Self {
        let per_class: Vec<ClassStats> = (0..confusion.labels.len())
            .map(|c| confusion.class_stats(c))
            .collect();
        let (precision, recall, f_measure) = confusion.weighted(&per_class);
        let correct = confusion.correct();
        Self {
            accuracy: confusion.accuracy(),
            precision,
            recall,
            f_measure,
            mae: errors.map(|e| e.0),
            rmse: errors.map(|e| e.1),
            correct,
            incorrect: confusion.total() - correct,
            per_class,
            confusion,
        }
    }
}

/// Stage at which a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Training,
    Evaluation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub stage: FailureStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { metrics: Metrics },
    Failed { failure: Failure },
}

/// Outcome of one (classifier, run, fold) trial. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub key: RunKey,
    pub train_size: usize,
    pub test_size: usize,
    pub elapsed_ms: u64,
    pub outcome: RunOutcome,
}

impl RunResult {
    pub fn failed(key: RunKey, partition: &Partition, stage: FailureStage, message: String) -> Self {
        Self {
            key,
            train_size: partition.train.len(),
            test_size: partition.test.len(),
            elapsed_ms: 0,
            outcome: RunOutcome::Failed {
                failure: Failure { stage, message },
            },
        }
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        match &self.outcome {
            RunOutcome::Success { metrics } => Some(metrics),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            RunOutcome::Failed { failure } => Some(failure),
            RunOutcome::Success { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.metrics().is_some()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Trains and tests one classifier on one partition.
#[derive(Clone)]
pub struct Evaluator {
    registry: Arc<ClassifierRegistry>,
    metric_set: MetricSet,
}

impl Evaluator {
    pub fn new(registry: Arc<ClassifierRegistry>, metric_set: MetricSet) -> Self {
        Self {
            registry,
            metric_set,
        }
    }

    pub fn metric_set(&self) -> MetricSet {
        self.metric_set
    }

    /// Evaluate a freshly instantiated classifier. Failures, panics included,
    /// come back as a failed [`RunResult`] rather than an error.
    pub fn evaluate(
        &self,
        spec: &ClassifierSpec,
        dataset: &Dataset,
        partition: &Partition,
        key: RunKey,
    ) -> RunResult {
        let start = Instant::now();
        let outcome = match self.train_and_test(spec, dataset, partition) {
            Ok(metrics) => RunOutcome::Success { metrics },
            Err(failure) => {
                tracing::warn!(
                    classifier = %key.classifier,
                    run = key.run,
                    fold = key.fold,
                    stage = ?failure.stage,
                    "Run failed: {}",
                    failure.message
                );
                RunOutcome::Failed { failure }
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            classifier = %key.classifier,
            run = key.run,
            fold = key.fold,
            elapsed_ms,
            "Run finished"
        );
        RunResult {
            key,
            train_size: partition.train.len(),
            test_size: partition.test.len(),
            elapsed_ms,
            outcome,
        }
    }

    fn train_and_test(
        &self,
        spec: &ClassifierSpec,
        dataset: &Dataset,
        partition: &Partition,
    ) -> Result<Metrics, Failure> {
        let training = |message: String| Failure {
            stage: FailureStage::Training,
            message,
        };
        let evaluation = |message: String| Failure {
            stage: FailureStage::Evaluation,
            message,
        };

        let classifier = self
            .registry
            .instantiate(spec)
            .map_err(|e| training(e.to_string()))?;
        let view = dataset.view(&partition.train);
        let model = panic::catch_unwind(AssertUnwindSafe(|| classifier.train(view)))
            .map_err(|p| training(format!("classifier panicked: {}", panic_message(p.as_ref()))))?
            .map_err(|e| training(e.to_string()))?;

        panic::catch_unwind(AssertUnwindSafe(|| {
            self.test(model.as_ref(), dataset, partition)
        }))
        .map_err(|p| evaluation(format!("classifier panicked: {}", panic_message(p.as_ref()))))?
        .map_err(evaluation)
    }

    fn test(
        &self,
        model: &dyn Model,
        dataset: &Dataset,
        partition: &Partition,
    ) -> Result<Metrics, String> {
        let labels = dataset.schema().class.labels.clone();
        let k = labels.len();
        let mut confusion = ConfusionMatrix::new(labels);
        let mut abs_err = 0.0;
        let mut sq_err = 0.0;

        for &i in &partition.test {
            let inst = dataset
                .instance(i)
                .ok_or_else(|| format!("test index {i} out of range"))?;
            let actual = inst
                .label
                .ok_or_else(|| format!("test instance {i} has no class label"))?;
            let dist = model
                .distribution(&inst.values)
                .map_err(|e| format!("instance {i}: {e}"))?;
            if dist.len() != k {
                return Err(format!(
                    "instance {i}: distribution has {} classes, expected {k}",
                    dist.len()
                ));
            }
            let predicted = crate::classifiers::argmax(&dist)
                .ok_or_else(|| format!("instance {i}: empty distribution"))?;
            confusion.record(actual, predicted);

            if self.metric_set == MetricSet::WithErrors {
                for (c, p) in dist.iter().enumerate() {
                    let target = if c == actual { 1.0 } else { 0.0 };
                    abs_err += (p - target).abs();
                    sq_err += (p - target).powi(2);
                }
            }
        }

        let errors = match self.metric_set {
            MetricSet::WithErrors => {
                let denom = (partition.test.len() * k).max(1) as f64;
                Some((abs_err / denom, (sq_err / denom).sqrt()))
            }
            MetricSet::Classification => None,
        };
        Ok(Metrics::from_confusion(confusion, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::threshold_dataset;
    use crate::experiment::partition::{folds_to_partitions, make_folds};

    fn evaluator(metric_set: MetricSet) -> Evaluator {
        Evaluator::new(Arc::new(ClassifierRegistry::with_builtins()), metric_set)
    }

    #[test]
    fn test_confusion_matrix_stats() {
        let mut cm = ConfusionMatrix::new(vec!["a".into(), "b".into()]);
        // 3 a->a, 1 a->b, 2 b->b
        for _ in 0..3 {
            cm.record(0, 0);
        }
        cm.record(0, 1);
        cm.record(1, 1);
        cm.record(1, 1);

        assert_eq!(cm.total(), 6);
        assert!((cm.accuracy() - 5.0 / 6.0).abs() < 1e-12);

        let a = cm.class_stats(0);
        assert_eq!((a.tp, a.fp, a.fn_, a.tn), (3, 0, 1, 2));
        assert!((a.precision - 1.0).abs() < 1e-12);
        assert!((a.recall - 0.75).abs() < 1e-12);

        let b = cm.class_stats(1);
        assert_eq!((b.tp, b.fp, b.fn_, b.tn), (2, 1, 0, 3));
    }

    #[test]
    fn test_evaluate_success() {
        let ds = threshold_dataset(100);
        let folds = make_folds(&ds, 10, 1, true).unwrap();
        let partitions = folds_to_partitions(&folds, 100);
        let result = evaluator(MetricSet::Classification).evaluate(
            &ClassifierSpec::new("naive_bayes"),
            &ds,
            &partitions[0],
            RunKey::new("naive_bayes", 0, 0, 0),
        );
        assert_eq!(result.train_size, 90);
        assert_eq!(result.test_size, 10);
        let metrics = result.metrics().expect("run should succeed");
        assert!((0.0..=1.0).contains(&metrics.accuracy));
        assert_eq!(metrics.correct + metrics.incorrect, 10);
        assert!(metrics.mae.is_none());
    }

    #[test]
    fn test_error_measures_present_when_requested() {
        let ds = threshold_dataset(20);
        let partition = Partition {
            train: (0..15).collect(),
            test: (15..20).collect(),
        };
        let result = evaluator(MetricSet::WithErrors).evaluate(
            &ClassifierSpec::new("zero_r"),
            &ds,
            &partition,
            RunKey::new("zero_r", 0, 0, 0),
        );
        let metrics = result.metrics().unwrap();
        let mae = metrics.mae.unwrap();
        let rmse = metrics.rmse.unwrap();
        assert!(mae > 0.0 && mae <= 1.0);
        assert!(rmse >= mae);
    }

    #[test]
    fn test_empty_training_partition_is_training_failure() {
        let ds = threshold_dataset(10);
        let partition = Partition {
            train: vec![],
            test: (0..10).collect(),
        };
        let result = evaluator(MetricSet::Classification).evaluate(
            &ClassifierSpec::new("zero_r"),
            &ds,
            &partition,
            RunKey::new("zero_r", 0, 0, 0),
        );
        assert_eq!(result.failure().map(|f| f.stage), Some(FailureStage::Training));
    }

    fn explode() -> usize {
        panic!("boom {}", 1)
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(explode).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
    }
}
