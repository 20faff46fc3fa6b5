//! End-to-end experiment tests: CSV + project file in, summary out.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use foldrun_core::classifiers::registry::ClassifierFactory;
use foldrun_core::classifiers::{Classifier, ClassifierRegistry, ClassifierSpec, Model, Params};
use foldrun_core::context::{ExperimentState, MemorySink};
use foldrun_core::data::DatasetView;
use foldrun_core::error::{ClassifierError, ExperimentError};
use foldrun_core::experiment::aggregate::SummaryStatus;
use foldrun_core::experiment::evaluator::FailureStage;
use foldrun_core::experiment::{ExecutionMode, ExperimentOrchestrator, ExperimentSpec};
use foldrun_core::persist::ModelStore;
use foldrun_core::workbench::{Workbench, predict};
use foldrun_core::{CsvSource, load_project_config};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// 100 rows: `loc` drives the class, `kind` is a nominal distractor.
fn write_dataset(path: &Path) {
    let mut csv = String::from("loc,kind,is_data_class\n");
    for i in 0..100 {
        let loc = i % 20;
        let kind = if i % 3 == 0 { "class" } else { "interface" };
        let label = if loc >= 12 { "true" } else { "false" };
        csv.push_str(&format!("{loc},{kind},{label}\n"));
    }
    fs::write(path, csv).unwrap();
}

fn project(dir: &TempDir, experiment: &str) -> std::path::PathBuf {
    write_dataset(&dir.path().join("smells.csv"));
    let config = format!(
        r#"
[dataset]
path = "smells.csv"

[[classifiers]]
id = "naive_bayes"

[[classifiers]]
id = "knn"
name = "knn-3"
params = {{ k = 3 }}

[experiment]
{experiment}
"#
    );
    let path = dir.path().join("foldrun.toml");
    fs::write(&path, config).unwrap();
    path
}

/// Always rejects its training data.
struct Refuser;

impl Classifier for Refuser {
    fn id(&self) -> &str {
        "refuser"
    }

    fn train(&self, _data: DatasetView<'_>) -> Result<Box<dyn Model>, ClassifierError> {
        Err(ClassifierError::RejectedData("refusing to learn".into()))
    }
}

/// Panics while training.
struct Crasher;

impl Classifier for Crasher {
    fn id(&self) -> &str {
        "crasher"
    }

    fn train(&self, _data: DatasetView<'_>) -> Result<Box<dyn Model>, ClassifierError> {
        panic!("classifier bug")
    }
}

fn build_refuser(_: &Params) -> Result<Box<dyn Classifier>, ClassifierError> {
    Ok(Box::new(Refuser))
}

fn build_crasher(_: &Params) -> Result<Box<dyn Classifier>, ClassifierError> {
    Ok(Box::new(Crasher))
}

fn no_load(_: &[u8]) -> Result<Box<dyn Model>, ClassifierError> {
    Err(ClassifierError::Encoding("not persistable".into()))
}

fn registry_with_failures() -> Arc<ClassifierRegistry> {
    let mut registry = ClassifierRegistry::with_builtins();
    registry.register(ClassifierFactory::new("refuser", "Always fails", build_refuser, no_load));
    registry.register(ClassifierFactory::new("crasher", "Always panics", build_crasher, no_load));
    Arc::new(registry)
}

#[tokio::test]
async fn cross_validation_from_project_file() {
    let dir = TempDir::new().unwrap();
    let config = load_project_config(&project(&dir, "folds = 10\nseed = 1\n"), None).unwrap();
    let dataset = Arc::new(config.load_dataset().unwrap());
    let (spec, warnings) = config.experiment_spec();
    assert!(warnings.is_empty());

    let orchestrator = ExperimentOrchestrator::new(Arc::new(ClassifierRegistry::with_builtins()));
    let report = orchestrator.run_detailed(&spec, dataset).await.unwrap();

    assert_eq!(report.results.len(), 20);
    for classifier in ["naive_bayes", "knn-3"] {
        let runs: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.key.classifier == classifier)
            .collect();
        assert_eq!(runs.len(), 10);
        assert!(runs.iter().all(|r| r.test_size == 10 && r.train_size == 90));

        let summary = report.summary.get(classifier).unwrap();
        let accuracy = summary.metrics.as_ref().unwrap().accuracy.mean;
        assert!((0.0..=1.0).contains(&accuracy));
    }
    // ordered by declaration
    assert_eq!(report.summary.classifiers[0].classifier, "naive_bayes");
    assert_eq!(report.summary.classifiers[1].classifier, "knn-3");
}

#[tokio::test]
async fn invalid_fold_value_falls_back_to_default() {
    let dir = TempDir::new().unwrap();
    let config = load_project_config(&project(&dir, "folds = \"abc\"\n"), None).unwrap();
    let (spec, warnings) = config.experiment_spec();
    assert_eq!(spec.folds, 10);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "folds");

    let dataset = Arc::new(config.load_dataset().unwrap());
    let summary = ExperimentOrchestrator::new(Arc::new(ClassifierRegistry::with_builtins()))
        .run(&spec, dataset)
        .await
        .unwrap();
    assert_eq!(summary.total_runs(), 20);
}

#[tokio::test]
async fn concurrent_mode_matches_standard_mode() {
    let dir = TempDir::new().unwrap();
    let config = load_project_config(&project(&dir, "folds = 5\nruns = 3\n"), None).unwrap();
    let dataset = Arc::new(config.load_dataset().unwrap());
    let (standard, _) = config.experiment_spec();
    let concurrent = standard.clone().into_custom().with_workers(4);

    let orchestrator = ExperimentOrchestrator::new(Arc::new(ClassifierRegistry::with_builtins()));
    let a = orchestrator.run_detailed(&standard, dataset.clone()).await.unwrap();
    let b = orchestrator.run_detailed(&concurrent, dataset).await.unwrap();

    assert_eq!(a.mode, ExecutionMode::Standard);
    assert_eq!(b.mode, ExecutionMode::Concurrent);
    assert_eq!(a.results.len(), 30);
    assert_eq!(a.summary, b.summary);
}

#[tokio::test]
async fn failing_classifier_does_not_affect_others() {
    let dir = TempDir::new().unwrap();
    let config = load_project_config(&project(&dir, "folds = 5\n"), None).unwrap();
    let dataset = Arc::new(config.load_dataset().unwrap());
    let registry = registry_with_failures();

    let baseline_spec = ExperimentSpec::new(vec![ClassifierSpec::new("naive_bayes")]).with_folds(5);
    let baseline = ExperimentOrchestrator::new(registry.clone())
        .run(&baseline_spec, dataset.clone())
        .await
        .unwrap();

    for custom in [false, true] {
        let mut spec = ExperimentSpec::new(vec![
            ClassifierSpec::new("refuser"),
            ClassifierSpec::new("naive_bayes"),
            ClassifierSpec::new("crasher"),
        ])
        .with_folds(5);
        if custom {
            spec = spec.into_custom().with_workers(2);
        }
        let sink = Arc::new(MemorySink::new());
        let summary = ExperimentOrchestrator::new(registry.clone())
            .with_sink(sink.clone())
            .run(&spec, dataset.clone())
            .await
            .unwrap();

        let refuser = summary.get("refuser").unwrap();
        assert_eq!(refuser.status, SummaryStatus::NoSuccessfulRuns);
        assert!(refuser.metrics.is_none());
        assert_eq!(refuser.failed_runs, 5);
        assert!(refuser.failures.iter().all(|f| f.stage == FailureStage::Training));

        let crasher = summary.get("crasher").unwrap();
        assert_eq!(crasher.status, SummaryStatus::NoSuccessfulRuns);
        assert!(crasher.failures[0].message.contains("classifier bug"));

        let mut expected = baseline.get("naive_bayes").unwrap().clone();
        expected.classifier_index = 1;
        assert_eq!(summary.get("naive_bayes"), Some(&expected));
        assert_eq!(sink.transitions().last(), Some(&ExperimentState::Done));
    }
}

#[tokio::test]
async fn percentage_split_on_ten_instances() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ten.csv");
    let mut csv = String::from("x,label\n");
    for i in 0..10 {
        csv.push_str(&format!("{i},{}\n", if i < 5 { "a" } else { "b" }));
    }
    fs::write(&path, csv).unwrap();
    let dataset = Arc::new(CsvSource::new(&path).load().unwrap());

    let spec = ExperimentSpec::new(vec![ClassifierSpec::new("zero_r")]).with_percentage(0.66, false);
    let report = ExperimentOrchestrator::new(Arc::new(ClassifierRegistry::with_builtins()))
        .run_detailed(&spec, dataset)
        .await
        .unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].train_size, 6);
    assert_eq!(report.results[0].test_size, 4);
}

#[test]
fn out_of_range_percentage_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let config = load_project_config(
        &project(&dir, "splittype = \"randomsplit\"\npercentage = 1.5\n"),
        None,
    )
    .unwrap();
    let dataset = Arc::new(config.load_dataset().unwrap());
    let (spec, _) = config.experiment_spec();

    let orchestrator = ExperimentOrchestrator::new(Arc::new(ClassifierRegistry::with_builtins()));
    let result = tokio_test::block_on(orchestrator.run(&spec, dataset));
    assert!(matches!(result, Err(ExperimentError::Configuration(_))));
}

#[test]
fn train_save_load_predict() {
    let dir = TempDir::new().unwrap();
    let config = load_project_config(&project(&dir, ""), None).unwrap();
    let dataset = config.load_dataset().unwrap();
    let registry = ClassifierRegistry::with_builtins();
    let workbench = Workbench::new(Arc::new(ClassifierRegistry::with_builtins()));
    let store = ModelStore::new(&config.output.dir);

    let trained: Vec<_> = workbench
        .train_all(&config.classifiers, &dataset)
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(trained.len(), 2);

    for model in &trained {
        let path = store.save(model).unwrap();
        store.write_description(model).unwrap();
        let restored = ModelStore::load(&path, &registry).unwrap();

        let fresh = CsvSource::new(&config.dataset.path)
            .load_with_schema(&restored.schema)
            .unwrap();
        let before = predict(model, &dataset).unwrap();
        let after = predict(&restored, &fresh).unwrap();
        assert_eq!(before.len(), 100);
        assert_eq!(
            before.iter().map(|p| &p.predicted).collect::<Vec<_>>(),
            after.iter().map(|p| &p.predicted).collect::<Vec<_>>()
        );
    }
    assert!(config.output.dir.join("knn-3.txt").exists());
}
