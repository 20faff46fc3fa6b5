//! Per-classifier aggregation of run results.

use super::evaluator::{FailureStage, Metrics, RunResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean and sample standard deviation of one measure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStat {
    pub mean: f64,
    pub std_dev: f64,
}

impl MetricStat {
    /// Sample statistics (n - 1 denominator); a single value has zero spread.
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                mean: 0.0,
                std_dev: 0.0,
            };
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let std_dev = if n == 1 {
            0.0
        } else {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            variance.sqrt()
        };
        Self { mean, std_dev }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub accuracy: MetricStat,
    pub precision: MetricStat,
    pub recall: MetricStat,
    pub f_measure: MetricStat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mae: Option<MetricStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rmse: Option<MetricStat>,
}

impl MetricSummary {
    fn from_metrics(metrics: &[&Metrics]) -> Self {
        let stat = |f: fn(&Metrics) -> f64| {
            MetricStat::from_values(&metrics.iter().map(|m| f(m)).collect::<Vec<_>>())
        };
        let optional = |f: fn(&Metrics) -> Option<f64>| {
            let values: Option<Vec<f64>> = metrics.iter().map(|m| f(m)).collect();
            values.map(|v| MetricStat::from_values(&v))
        };
        Self {
            accuracy: stat(|m| m.accuracy),
            precision: stat(|m| m.precision),
            recall: stat(|m| m.recall),
            f_measure: stat(|m| m.f_measure),
            mae: optional(|m| m.mae),
            rmse: optional(|m| m.rmse),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Ok,
    /// Some runs failed; metrics cover the successful ones.
    Partial,
    NoSuccessfulRuns,
}

/// A failed run, as listed in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub run: usize,
    pub fold: usize,
    pub stage: FailureStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSummary {
    pub classifier: String,
    pub classifier_index: usize,
    pub status: SummaryStatus,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub failures: Vec<FailureRecord>,
    /// `None` when no run succeeded.
    pub metrics: Option<MetricSummary>,
}

/// Aggregated experiment outcome, one entry per classifier in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub classifiers: Vec<ClassifierSummary>,
}

impl Summary {
    pub fn get(&self, classifier: &str) -> Option<&ClassifierSummary> {
        self.classifiers.iter().find(|c| c.classifier == classifier)
    }

    pub fn total_runs(&self) -> usize {
        self.classifiers
            .iter()
            .map(|c| c.successful_runs + c.failed_runs)
            .sum()
    }

    pub fn total_failures(&self) -> usize {
        self.classifiers.iter().map(|c| c.failed_runs).sum()
    }
}

/// Group results by classifier and summarize each group.
///
/// Results are ordered by (classifier position, run, fold) first, so the
/// summary does not depend on the order in which runs completed.
pub fn aggregate(results: &[RunResult]) -> Summary {
    let mut sorted: Vec<&RunResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.key.order());

    let mut groups: BTreeMap<usize, Vec<&RunResult>> = BTreeMap::new();
    for r in sorted {
        groups.entry(r.key.classifier_index).or_default().push(r);
    }

    let classifiers = groups
        .into_iter()
        .map(|(classifier_index, runs)| {
            let classifier = runs
                .first()
                .map(|r| r.key.classifier.clone())
                .unwrap_or_default();
            let metrics: Vec<&Metrics> = runs.iter().filter_map(|r| r.metrics()).collect();
            let failures: Vec<FailureRecord> = runs
                .iter()
                .filter_map(|r| {
                    r.failure().map(|f| FailureRecord {
                        run: r.key.run,
                        fold: r.key.fold,
                        stage: f.stage,
                        message: f.message.clone(),
                    })
                })
                .collect();

            let status = match (metrics.is_empty(), failures.is_empty()) {
                (true, _) => SummaryStatus::NoSuccessfulRuns,
                (false, true) => SummaryStatus::Ok,
                (false, false) => SummaryStatus::Partial,
            };
            ClassifierSummary {
                classifier,
                classifier_index,
                status,
                successful_runs: metrics.len(),
                failed_runs: failures.len(),
                failures,
                metrics: (!metrics.is_empty()).then(|| MetricSummary::from_metrics(&metrics)),
            }
        })
        .collect();

    Summary { classifiers }
}
