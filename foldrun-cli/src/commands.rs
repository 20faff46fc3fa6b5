//! CLI subcommand handlers.

use crate::{Commands, ExperimentArgs, OutputArgs};
use anyhow::Context;
use foldrun_core::experiment::{ExpType, ExperimentSettings, SettingValue, SplitType};
use foldrun_core::persist::{ModelStore, write_json};
use foldrun_core::workbench::{self, TrainedModel, Workbench};
use foldrun_core::{
    ClassifierRegistry, CsvSource, Dataset, ExperimentOrchestrator, ProjectConfig,
    load_project_config,
};
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Train { config, output } => handle_train(&config, &output).await,
        Commands::Cross {
            config,
            fold,
            seed,
            output,
        } => handle_cross(&config, fold, seed, &output).await,
        Commands::Experiment {
            config,
            experiment,
            output,
        } => handle_experiment(&config, &experiment, &output, false).await,
        Commands::CustomExperiment {
            config,
            experiment,
            output,
        } => handle_experiment(&config, &experiment, &output, true).await,
        Commands::Predict {
            model,
            dataset,
            output,
            delimiter,
        } => handle_predict(&model, &dataset, output.as_deref(), delimiter).await,
        Commands::Classifiers => handle_classifiers(),
    }
}

fn registry() -> Arc<ClassifierRegistry> {
    Arc::new(ClassifierRegistry::with_builtins())
}

fn load_project(
    path: &Path,
    overrides: Option<&ExperimentSettings>,
) -> anyhow::Result<(ProjectConfig, Arc<Dataset>)> {
    let config = load_project_config(path, overrides)
        .map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?;
    let dataset = config
        .load_dataset()
        .with_context(|| format!("Failed to load {}", config.dataset.path.display()))?;
    tracing::info!(
        dataset = dataset.name(),
        instances = dataset.len(),
        attributes = dataset.schema().width(),
        classes = dataset.schema().num_classes(),
        "Loaded dataset"
    );
    Ok((config, Arc::new(dataset)))
}

/// Train on the full dataset off the async runtime.
///
/// Classifiers that fail to train are skipped; the workbench has already
/// logged why.
async fn train_models(
    config: &ProjectConfig,
    dataset: &Arc<Dataset>,
) -> anyhow::Result<Vec<TrainedModel>> {
    let classifiers = config.classifiers.clone();
    let dataset = dataset.clone();
    let results = tokio::task::spawn_blocking(move || {
        Workbench::new(registry()).train_all(&classifiers, &dataset)
    })
    .await?;

    Ok(results.into_iter().filter_map(Result::ok).collect())
}

fn serialize_models(store: &ModelStore, models: &[TrainedModel]) -> anyhow::Result<()> {
    for model in models {
        let path = store.save(model)?;
        println!("Serialized {} to {}", model.name, path.display());
    }
    Ok(())
}

async fn handle_train(config_path: &Path, output: &OutputArgs) -> anyhow::Result<()> {
    let (config, dataset) = load_project(config_path, None)?;
    let models = train_models(&config, &dataset).await?;
    let store = ModelStore::new(&config.output.dir);

    for model in &models {
        if output.print_or_default() {
            println!("{}", model.description());
        }
        if output.save {
            let path = store.write_description(model)?;
            println!("Saved description of {} to {}", model.name, path.display());
        }
    }
    if output.ser {
        serialize_models(&store, &models)?;
    }
    Ok(())
}

async fn handle_cross(
    config_path: &Path,
    fold: Option<String>,
    seed: Option<String>,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    let overrides = ExperimentSettings {
        exptype: Some(SettingValue::from(ExpType::Classification.as_str())),
        splittype: Some(SettingValue::from(SplitType::CrossValidation.as_str())),
        folds: fold.map(SettingValue::Text),
        seed: seed.map(SettingValue::Text),
        runs: Some(SettingValue::Integer(1)),
        ..Default::default()
    };
    run_experiment(config_path, &overrides, output, false).await
}

async fn handle_experiment(
    config_path: &Path,
    args: &ExperimentArgs,
    output: &OutputArgs,
    custom: bool,
) -> anyhow::Result<()> {
    run_experiment(config_path, &args.to_settings(), output, custom).await
}

async fn run_experiment(
    config_path: &Path,
    overrides: &ExperimentSettings,
    output: &OutputArgs,
    custom: bool,
) -> anyhow::Result<()> {
    let (config, dataset) = load_project(config_path, Some(overrides))?;
    let (mut spec, config_warnings) = config.experiment_spec();
    if custom {
        spec = spec.into_custom();
    }

    let mut report = ExperimentOrchestrator::new(registry())
        .run_detailed(&spec, dataset.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Experiment failed: {e}"))?;
    // Fallbacks from the project file come before the orchestrator's own
    let mut warnings = config_warnings;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;

    if report.summary.total_failures() > 0 {
        tracing::warn!(
            failed = report.summary.total_failures(),
            total = report.summary.total_runs(),
            "Some runs failed"
        );
    }
    if output.print_or_default() {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    }
    if output.save {
        let path = config.output.dir.join("summary.json");
        write_json(&path, &report)?;
        println!("Saved report to {}", path.display());
    }
    if output.ser {
        let models = train_models(&config, &dataset).await?;
        serialize_models(&ModelStore::new(&config.output.dir), &models)?;
    }
    Ok(())
}

async fn handle_predict(
    model_path: &Path,
    dataset_path: &Path,
    output: Option<&Path>,
    delimiter: char,
) -> anyhow::Result<()> {
    let registry = registry();
    let trained = ModelStore::load(model_path, &registry)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;
    let dataset = CsvSource::new(dataset_path)
        .with_delimiter(delimiter)
        .load_with_schema(&trained.schema)?;

    let predictions = tokio::task::spawn_blocking(move || workbench::predict(&trained, &dataset))
        .await??;
    let csv = workbench::predictions_to_csv(&predictions);

    match output {
        Some(path) => {
            std::fs::write(path, csv)?;
            println!(
                "Wrote {} predictions to {}",
                predictions.len(),
                path.display()
            );
        }
        None => print!("{csv}"),
    }
    Ok(())
}

fn handle_classifiers() -> anyhow::Result<()> {
    let registry = registry();
    for id in registry.list() {
        let Some(factory) = registry.get(id) else {
            continue;
        };
        println!("{id}: {}", factory.description);
        for param in &factory.params {
            println!("    {} ({:?}): {}", param.name, param.kind, param.description);
        }
    }
    Ok(())
}
