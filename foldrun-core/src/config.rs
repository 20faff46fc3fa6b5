//! Project configuration.
//!
//! A project is described by a TOML file naming the dataset, the classifiers
//! and the experiment settings. It is layered with figment:
//!
//! 1. Built-in defaults
//! 2. The project file
//! 3. Environment variables (prefixed with `FOLDRUN_`, nested keys split on `__`)
//! 4. Explicit overrides (command-line flags)
//!
//! Relative paths in the file are resolved against the file's directory.

use crate::classifiers::ClassifierSpec;
use crate::data::{CsvSource, Dataset};
use crate::error::ExperimentError;
use crate::experiment::spec::{ConfigWarning, ExperimentSettings, ExperimentSpec};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "FOLDRUN_";

/// Where to read the dataset from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub path: PathBuf,
    /// Class column; defaults to the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_attribute: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            class_attribute: None,
            delimiter: default_delimiter(),
        }
    }
}

impl DatasetConfig {
    pub fn source(&self) -> CsvSource {
        CsvSource::new(&self.path)
            .with_delimiter(self.delimiter)
            .with_class_attribute(self.class_attribute.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for summaries, model descriptions and serialized models.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub classifiers: Vec<ClassifierSpec>,
    #[serde(default)]
    pub experiment: ExperimentSettings,
    #[serde(default)]
    pub output: OutputConfig,
}

impl ProjectConfig {
    /// Parse the experiment settings, recording a warning for every fallback.
    pub fn experiment_spec(&self) -> (ExperimentSpec, Vec<ConfigWarning>) {
        ExperimentSpec::from_settings(self.classifiers.clone(), &self.experiment)
    }

    pub fn load_dataset(&self) -> Result<Dataset, ExperimentError> {
        self.dataset.source().load()
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.dataset.path.is_relative() {
            self.dataset.path = base.join(&self.dataset.path);
        }
        if self.output.dir.is_relative() {
            self.output.dir = base.join(&self.output.dir);
        }
    }
}

/// Load a project file with environment and explicit overrides applied.
pub fn load_project_config(
    path: &Path,
    overrides: Option<&ExperimentSettings>,
) -> Result<ProjectConfig, ExperimentError> {
    load_layered(path, overrides, ENV_PREFIX)
}

fn load_layered(
    path: &Path,
    overrides: Option<&ExperimentSettings>,
    env_prefix: &str,
) -> Result<ProjectConfig, ExperimentError> {
    if !path.is_file() {
        return Err(ExperimentError::configuration(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let mut figment = Figment::from(Serialized::defaults(ProjectConfig::default()))
        .merge(Toml::file(path))
        // FOLDRUN_EXPERIMENT__FOLDS, FOLDRUN_DATASET__PATH, etc.
        .merge(Env::prefixed(env_prefix).split("__"));
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::default("experiment", overrides));
    }

    let mut config: ProjectConfig = figment.extract().map_err(Box::new)?;
    if config.dataset.path.as_os_str().is_empty() {
        return Err(ExperimentError::configuration(format!(
            "{}: no dataset path configured",
            path.display()
        )));
    }
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);
    tracing::debug!(
        config = %path.display(),
        dataset = %config.dataset.path.display(),
        classifiers = config.classifiers.len(),
        "Loaded project config"
    );
    Ok(config)
}
