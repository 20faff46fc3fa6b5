//! Experiment orchestration: validation, partitioning, run scheduling and aggregation.

use super::aggregate::{Summary, aggregate};
use super::evaluator::{Evaluator, FailureStage, RunKey, RunResult};
use super::partition::{self, Partition, PartitionPlan};
use super::spec::{ConfigWarning, ExecutionMode, ExperimentSpec};
use crate::classifiers::{ClassifierRegistry, ClassifierSpec};
use crate::context::{EventSink, ExperimentContext, ExperimentEvent, ExperimentState, TracingSink};
use crate::data::Dataset;
use crate::error::ExperimentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use uuid::Uuid;

/// Everything an experiment produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub id: Uuid,
    pub dataset: String,
    pub started_at: DateTime<Utc>,
    pub mode: ExecutionMode,
    /// Settings as run, after out-of-range values were replaced.
    pub spec: ExperimentSpec,
    pub summary: Summary,
    /// Ordered by (classifier position, run, fold).
    pub results: Vec<RunResult>,
    pub warnings: Vec<ConfigWarning>,
    pub transitions: Vec<ExperimentState>,
    pub elapsed_ms: u64,
}

/// Tracks the state machine and reports every transition.
struct Lifecycle<'a> {
    ctx: &'a ExperimentContext,
    state: ExperimentState,
    transitions: Vec<ExperimentState>,
}

impl<'a> Lifecycle<'a> {
    fn new(ctx: &'a ExperimentContext) -> Self {
        Self {
            ctx,
            state: ExperimentState::Configured,
            transitions: vec![ExperimentState::Configured],
        }
    }

    fn advance(&mut self, to: ExperimentState, reason: Option<String>) {
        self.ctx.emit(ExperimentEvent::StateChanged {
            from: self.state,
            to,
            reason,
        });
        self.state = to;
        self.transitions.push(to);
    }

    fn fail(&mut self, err: ExperimentError) -> ExperimentError {
        tracing::error!(state = %self.state, "Experiment failed: {err}");
        self.advance(ExperimentState::Failed, Some(err.to_string()));
        err
    }
}

/// Runs experiments against a classifier registry.
///
/// Every call to [`run_detailed`](Self::run_detailed) gets its own
/// [`ExperimentContext`]; only the event sink is shared between experiments.
pub struct ExperimentOrchestrator {
    registry: Arc<ClassifierRegistry>,
    sink: Arc<dyn EventSink>,
}

impl ExperimentOrchestrator {
    pub fn new(registry: Arc<ClassifierRegistry>) -> Self {
        Self {
            registry,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run an experiment and return its summary.
    pub async fn run(
        &self,
        spec: &ExperimentSpec,
        dataset: Arc<Dataset>,
    ) -> Result<Summary, ExperimentError> {
        Ok(self.run_detailed(spec, dataset).await?.summary)
    }

    /// Run an experiment and return the full report.
    ///
    /// Configuration, dataset and partitioning problems are returned as
    /// errors before any training happens. Failures of individual runs are
    /// recorded in the report instead.
    pub async fn run_detailed(
        &self,
        spec: &ExperimentSpec,
        dataset: Arc<Dataset>,
    ) -> Result<ExperimentReport, ExperimentError> {
        let context = ExperimentContext::with_sink(self.sink.clone());
        let ctx = &context;
        let mut lifecycle = Lifecycle::new(ctx);
        tracing::info!(
            experiment = %ctx.id,
            dataset = dataset.name(),
            instances = dataset.len(),
            classifiers = spec.classifiers.len(),
            "Starting experiment"
        );

        if let Err(e) = self.validate(spec, &dataset) {
            return Err(lifecycle.fail(e));
        }

        lifecycle.advance(ExperimentState::Partitioning, None);
        let (spec, warnings) = spec.sanitized();
        for warning in &warnings {
            ctx.warn(warning.clone());
        }
        let plan = match partition::plan(&dataset, spec.split_strategy(), spec.seed, spec.runs) {
            Ok(plan) => Arc::new(plan),
            Err(e) => return Err(lifecycle.fail(e)),
        };

        let mode = spec.mode();
        lifecycle.advance(
            ExperimentState::Running,
            Some(format!(
                "{} runs in {mode:?} mode",
                plan.len() * spec.classifiers.len()
            )),
        );
        let evaluator = Evaluator::new(self.registry.clone(), spec.metric_set());
        let outcome = match mode {
            ExecutionMode::Standard => {
                self.run_standard(ctx, &spec, &dataset, &plan, &evaluator).await
            }
            ExecutionMode::Concurrent => {
                self.run_concurrent(ctx, &spec, &dataset, &plan, &evaluator).await
            }
        };
        let mut results = match outcome {
            Ok(results) => results,
            Err(e) => return Err(lifecycle.fail(e)),
        };

        lifecycle.advance(ExperimentState::Aggregating, None);
        results.sort_by_key(|r| r.key.order());
        let summary = aggregate(&results);

        lifecycle.advance(ExperimentState::Done, None);
        let elapsed_ms = ctx.elapsed_ms();
        ctx.emit(ExperimentEvent::Finished {
            total_runs: results.len(),
            failed_runs: summary.total_failures(),
            elapsed_ms,
        });

        Ok(ExperimentReport {
            id: ctx.id,
            dataset: dataset.name().to_string(),
            started_at: ctx.started_at(),
            mode,
            spec,
            summary,
            results,
            warnings,
            transitions: lifecycle.transitions,
            elapsed_ms,
        })
    }

    fn validate(&self, spec: &ExperimentSpec, dataset: &Dataset) -> Result<(), ExperimentError> {
        if spec.classifiers.is_empty() {
            return Err(ExperimentError::configuration("no classifiers configured"));
        }
        let mut names = HashSet::new();
        for classifier in &spec.classifiers {
            self.registry.resolve(classifier)?;
            if !names.insert(classifier.display_name()) {
                return Err(ExperimentError::configuration(format!(
                    "classifier name `{}` is used more than once",
                    classifier.display_name()
                )));
            }
        }
        if dataset.is_empty() {
            return Err(ExperimentError::dataset(format!(
                "dataset `{}` has no instances",
                dataset.name()
            )));
        }
        let unlabeled = dataset.unlabeled_count();
        if unlabeled > 0 {
            return Err(ExperimentError::dataset(format!(
                "dataset `{}` has {unlabeled} instances without a class label",
                dataset.name()
            )));
        }
        Ok(())
    }

    /// Every (classifier, run, fold) in order, one at a time.
    async fn run_standard(
        &self,
        ctx: &ExperimentContext,
        spec: &ExperimentSpec,
        dataset: &Arc<Dataset>,
        plan: &Arc<PartitionPlan>,
        evaluator: &Evaluator,
    ) -> Result<Vec<RunResult>, ExperimentError> {
        let classifiers = spec.classifiers.clone();
        let dataset = dataset.clone();
        let plan = plan.clone();
        let evaluator = evaluator.clone();
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || {
            let mut results = Vec::with_capacity(classifiers.len() * plan.len());
            for (index, classifier) in classifiers.iter().enumerate() {
                for (run, fold, partition) in plan.iter() {
                    let key = RunKey::new(classifier.display_name(), index, run, fold);
                    let result = evaluator.evaluate(classifier, &dataset, partition, key);
                    emit_completed(&ctx, &result);
                    results.push(result);
                }
            }
            results
        })
        .await
        .map_err(|e| ExperimentError::evaluation(format!("standard run aborted: {e}")))
    }

    /// Every (classifier, run, fold) as its own task, bounded by the worker count.
    async fn run_concurrent(
        &self,
        ctx: &ExperimentContext,
        spec: &ExperimentSpec,
        dataset: &Arc<Dataset>,
        plan: &Arc<PartitionPlan>,
        evaluator: &Evaluator,
    ) -> Result<Vec<RunResult>, ExperimentError> {
        let workers = spec.worker_count().max(1);
        let expected = spec.classifiers.len() * plan.len();
        tracing::info!(workers, tasks = expected, "Scheduling concurrent runs");

        let semaphore = Arc::new(Semaphore::new(workers));
        let (tx, mut rx) = mpsc::channel::<RunResult>(workers * 2);
        let mut pending: Vec<RunKey> = Vec::with_capacity(expected);

        for (index, classifier) in spec.classifiers.iter().enumerate() {
            for (run, fold, _) in plan.iter() {
                let key = RunKey::new(classifier.display_name(), index, run, fold);
                pending.push(key.clone());

                let classifier = classifier.clone();
                let dataset = dataset.clone();
                let plan = plan.clone();
                let evaluator = evaluator.clone();
                let sem = semaphore.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return;
                    };
                    let task_key = key.clone();
                    let task_plan = plan.clone();
                    let joined = tokio::task::spawn_blocking(move || {
                        evaluate_planned(&evaluator, &classifier, &dataset, &task_plan, task_key)
                    })
                    .await;
                    let result = joined.unwrap_or_else(|e| {
                        let partition = plan.get(run, fold).cloned().unwrap_or_default();
                        RunResult::failed(
                            key,
                            &partition,
                            FailureStage::Evaluation,
                            format!("run task aborted: {e}"),
                        )
                    });
                    // The collector only stops once every sender is gone
                    let _ = tx.send(result).await;
                });
            }
        }
        drop(tx);

        let mut results = Vec::with_capacity(expected);
        while let Some(result) = rx.recv().await {
            emit_completed(ctx, &result);
            results.push(result);
        }

        // Tasks that died before reporting still get a result
        if results.len() < expected {
            let seen: HashSet<(usize, usize, usize)> = results.iter().map(|r| r.key.order()).collect();
            for key in pending {
                if !seen.contains(&key.order()) {
                    let partition = plan.get(key.run, key.fold).cloned().unwrap_or_default();
                    results.push(RunResult::failed(
                        key,
                        &partition,
                        FailureStage::Evaluation,
                        "run task ended without reporting a result".into(),
                    ));
                }
            }
        }
        Ok(results)
    }
}

fn evaluate_planned(
    evaluator: &Evaluator,
    classifier: &ClassifierSpec,
    dataset: &Dataset,
    plan: &PartitionPlan,
    key: RunKey,
) -> RunResult {
    match plan.get(key.run, key.fold) {
        Some(partition) => evaluator.evaluate(classifier, dataset, partition, key),
        None => RunResult::failed(
            key,
            &Partition::default(),
            FailureStage::Evaluation,
            "partition missing from plan".into(),
        ),
    }
}

fn emit_completed(ctx: &ExperimentContext, result: &RunResult) {
    ctx.emit(ExperimentEvent::RunCompleted {
        key: result.key.clone(),
        success: result.is_success(),
        elapsed_ms: result.elapsed_ms,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemorySink;
    use crate::data::dataset::tests::threshold_dataset;
    use crate::data::{Attribute, ClassAttribute, DatasetSchema, Instance, Value};
    use crate::experiment::aggregate::SummaryStatus;
    use crate::experiment::spec::SplitType;
    use pretty_assertions::assert_eq;

    fn orchestrator() -> (ExperimentOrchestrator, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let orch = ExperimentOrchestrator::new(Arc::new(ClassifierRegistry::with_builtins()))
            .with_sink(sink.clone());
        (orch, sink)
    }

    #[tokio::test]
    async fn test_standard_cross_validation() {
        let (orch, sink) = orchestrator();
        let spec = ExperimentSpec::new(vec![ClassifierSpec::new("naive_bayes")]);
        let report = orch
            .run_detailed(&spec, Arc::new(threshold_dataset(100)))
            .await
            .unwrap();

        assert_eq!(report.mode, ExecutionMode::Standard);
        assert_eq!(report.results.len(), 10);
        assert!(report.results.iter().all(|r| r.test_size == 10));
        let summary = report.summary.get("naive_bayes").unwrap();
        assert_eq!(summary.status, SummaryStatus::Ok);
        let accuracy = summary.metrics.as_ref().unwrap().accuracy.mean;
        assert!((0.0..=1.0).contains(&accuracy));
        assert_eq!(
            report.transitions,
            vec![
                ExperimentState::Configured,
                ExperimentState::Partitioning,
                ExperimentState::Running,
                ExperimentState::Aggregating,
                ExperimentState::Done,
            ]
        );
        assert_eq!(
            sink.transitions(),
            report.transitions[1..].to_vec()
        );
    }

    #[tokio::test]
    async fn test_concurrent_matches_standard() {
        let classifiers = vec![
            ClassifierSpec::new("zero_r"),
            ClassifierSpec::new("knn").with_param("k", serde_json::json!(3)),
        ];
        let dataset = Arc::new(threshold_dataset(60));
        let standard = ExperimentSpec::new(classifiers).with_folds(5).with_runs(2);
        let concurrent = standard.clone().into_custom().with_workers(3);

        let (orch, _) = orchestrator();
        let a = orch.run_detailed(&standard, dataset.clone()).await.unwrap();
        let b = orch.run_detailed(&concurrent, dataset).await.unwrap();
        assert_eq!(b.mode, ExecutionMode::Concurrent);
        assert_eq!(a.summary, b.summary);
        assert_eq!(
            a.results.iter().map(|r| r.key.clone()).collect::<Vec<_>>(),
            b.results.iter().map(|r| r.key.clone()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_percentage_split() {
        let (orch, _) = orchestrator();
        let spec = ExperimentSpec::new(vec![ClassifierSpec::new("zero_r")]).with_percentage(0.66, false);
        let report = orch.run_detailed(&spec, Arc::new(threshold_dataset(10))).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].train_size, 6);
        assert_eq!(report.results[0].test_size, 4);
    }

    #[tokio::test]
    async fn test_unknown_classifier_fails_before_running() {
        let (orch, sink) = orchestrator();
        let spec = ExperimentSpec::new(vec![ClassifierSpec::new("j48")]);
        let err = orch.run(&spec, Arc::new(threshold_dataset(20))).await.unwrap_err();
        assert!(matches!(err, ExperimentError::Configuration(_)));
        assert_eq!(sink.transitions(), vec![ExperimentState::Failed]);
    }

    #[tokio::test]
    async fn test_out_of_range_percentage_is_fatal() {
        let (orch, sink) = orchestrator();
        let spec = ExperimentSpec::new(vec![ClassifierSpec::new("zero_r")]).with_percentage(1.5, false);
        assert_eq!(spec.splittype, SplitType::RandomSplit);
        let err = orch.run(&spec, Arc::new(threshold_dataset(20))).await.unwrap_err();
        assert!(matches!(err, ExperimentError::Configuration(_)));
        assert_eq!(
            sink.transitions(),
            vec![ExperimentState::Partitioning, ExperimentState::Failed]
        );
    }

    #[tokio::test]
    async fn test_invalid_folds_fall_back_with_warning() {
        let (orch, _) = orchestrator();
        let spec = ExperimentSpec::new(vec![ClassifierSpec::new("zero_r")]).with_folds(0);
        let report = orch.run_detailed(&spec, Arc::new(threshold_dataset(30))).await.unwrap();
        assert_eq!(report.spec.folds, 10);
        assert_eq!(report.results.len(), 10);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_each_experiment_gets_its_own_context() {
        let (orch, sink) = orchestrator();
        let spec = ExperimentSpec::new(vec![ClassifierSpec::new("zero_r")]).with_folds(2);
        let dataset = Arc::new(threshold_dataset(20));

        let a = orch.run_detailed(&spec, dataset.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let b = orch.run_detailed(&spec, dataset).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(b.started_at - a.started_at >= chrono::Duration::milliseconds(300));
        assert!(b.elapsed_ms < 300, "elapsed {} includes the pause", b.elapsed_ms);
        let finished = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, ExperimentEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 2);
    }

    #[tokio::test]
    async fn test_huge_run_count_falls_back() {
        let (orch, _) = orchestrator();
        let spec = ExperimentSpec::new(vec![ClassifierSpec::new("zero_r")])
            .with_folds(2)
            .with_runs(usize::MAX)
            .into_custom()
            .with_workers(usize::MAX);
        let report = orch.run_detailed(&spec, Arc::new(threshold_dataset(20))).await.unwrap();
        assert_eq!(report.spec.runs, 1);
        assert_eq!(report.spec.workers, None);
        assert_eq!(report.results.len(), 2);
        assert_eq!(
            report.warnings.iter().map(|w| w.field.as_str()).collect::<Vec<_>>(),
            vec!["runs", "workers"]
        );
    }

    #[tokio::test]
    async fn test_rejects_unlabeled_and_duplicate_names() {
        let (orch, _) = orchestrator();
        let schema = DatasetSchema::new(
            vec![Attribute::numeric("x")],
            ClassAttribute {
                name: "c".into(),
                labels: vec!["a".into(), "b".into()],
            },
        );
        let instances = (0..10)
            .map(|i| Instance::new(vec![Value::Numeric(i as f64)], (i != 3).then_some(i % 2)))
            .collect();
        let unlabeled = Arc::new(Dataset::new("partial", schema, instances).unwrap());
        let spec = ExperimentSpec::new(vec![ClassifierSpec::new("zero_r")]);
        assert!(matches!(
            orch.run(&spec, unlabeled).await,
            Err(ExperimentError::Dataset(_))
        ));

        let dupes = ExperimentSpec::new(vec![ClassifierSpec::new("zero_r"), ClassifierSpec::new("zero_r")]);
        assert!(matches!(
            orch.run(&dupes, Arc::new(threshold_dataset(20))).await,
            Err(ExperimentError::Configuration(_))
        ));
    }
}
