//! Experiment specification and the parse-with-default policy for its fields.
//!
//! Every experiment field arrives as a raw [`SettingValue`] (from the config
//! file, environment, or a command-line flag) and goes through
//! [`parse_or_default`]: a value that does not parse is replaced by the
//! documented default and a [`ConfigWarning`] is recorded. A bad value never
//! aborts the run.

use super::evaluator::MetricSet;
use crate::classifiers::ClassifierSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_FOLDS: usize = 10;
pub const DEFAULT_SEED: u64 = 1;
pub const DEFAULT_RUNS: usize = 1;
pub const DEFAULT_PERCENTAGE: f64 = 0.66;
pub const DEFAULT_RANDOMIZED: bool = false;
pub const DEFAULT_STRATIFIED: bool = true;

/// Upper bound on repeated runs.
pub const MAX_RUNS: usize = 10_000;
/// Upper bound on scheduled trials (classifiers x runs x folds).
pub const MAX_TASKS: usize = 1_000_000;
/// Upper bound on the worker pool.
pub const MAX_WORKERS: usize = 1024;

/// A raw configuration scalar, as written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s.trim()),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Unvalidated experiment settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exptype: Option<SettingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splittype: Option<SettingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folds: Option<SettingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<SettingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<SettingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<SettingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub randomized: Option<SettingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stratified: Option<SettingValue>,
    /// Worker pool size for concurrent mode; unset means available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<SettingValue>,
}

impl ExperimentSettings {
    /// Overlay every field that `other` sets.
    pub fn merge(&mut self, other: &ExperimentSettings) {
        fn pick(dst: &mut Option<SettingValue>, src: &Option<SettingValue>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }
        pick(&mut self.exptype, &other.exptype);
        pick(&mut self.splittype, &other.splittype);
        pick(&mut self.folds, &other.folds);
        pick(&mut self.seed, &other.seed);
        pick(&mut self.runs, &other.runs);
        pick(&mut self.percentage, &other.percentage);
        pick(&mut self.randomized, &other.randomized);
        pick(&mut self.stratified, &other.stratified);
        pick(&mut self.workers, &other.workers);
    }
}

/// A configuration value that was replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub field: String,
    pub value: String,
    pub fallback: String,
    pub reason: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the {} value `{}` wasn't valid [{}], the default value will be used ({})",
            self.field, self.value, self.reason, self.fallback
        )
    }
}

/// Parse a raw setting, falling back to `default` (and recording a warning) on failure.
pub fn parse_or_default<T>(
    field: &str,
    raw: Option<&SettingValue>,
    default: T,
    warnings: &mut Vec<ConfigWarning>,
) -> T
where
    T: FromStr + fmt::Display,
    T::Err: fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    let text = raw.to_string();
    match text.parse::<T>() {
        Ok(value) => value,
        Err(e) => {
            let warning = ConfigWarning {
                field: field.to_string(),
                value: text,
                fallback: default.to_string(),
                reason: e.to_string(),
            };
            tracing::warn!("{warning}");
            warnings.push(warning);
            default
        }
    }
}

/// What to measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpType {
    #[default]
    Classification,
    /// Classification plus error measures (MAE, RMSE).
    Regression,
    /// Classification with precomputed folds run concurrently.
    Custom,
}

impl ExpType {
    pub const VALUES: [&'static str; 3] = ["classification", "regression", "custom"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Regression => "regression",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for ExpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "classification" => Ok(Self::Classification),
            "regression" => Ok(Self::Regression),
            "custom" => Ok(Self::Custom),
            other => Err(format!(
                "unknown exptype `{other}` (expected one of {})",
                Self::VALUES.join(", ")
            )),
        }
    }
}

impl fmt::Display for ExpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How train/test partitions are formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitType {
    #[default]
    CrossValidation,
    RandomSplit,
    /// Cross-validation with precomputed folds run concurrently.
    Custom,
}

impl SplitType {
    pub const VALUES: [&'static str; 3] = ["crossvalidation", "randomsplit", "custom"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossValidation => "crossvalidation",
            Self::RandomSplit => "randomsplit",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for SplitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "crossvalidation" => Ok(Self::CrossValidation),
            "randomsplit" | "percentage" => Ok(Self::RandomSplit),
            "custom" => Ok(Self::Custom),
            other => Err(format!(
                "unknown splittype `{other}` (expected one of {})",
                Self::VALUES.join(", ")
            )),
        }
    }
}

impl fmt::Display for SplitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sequential baseline or the precomputed-partition worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Standard,
    Concurrent,
}

/// Partitioning policy derived from the split type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitStrategy {
    CrossValidation { folds: usize, stratified: bool },
    Percentage { percentage: f64, randomized: bool },
}

/// Immutable experiment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub classifiers: Vec<ClassifierSpec>,
    pub exptype: ExpType,
    pub splittype: SplitType,
    pub folds: usize,
    pub seed: u64,
    pub runs: usize,
    pub percentage: f64,
    pub randomized: bool,
    pub stratified: bool,
    pub workers: Option<usize>,
}

impl ExperimentSpec {
    /// A spec with every field at its default.
    pub fn new(classifiers: Vec<ClassifierSpec>) -> Self {
        Self {
            classifiers,
            exptype: ExpType::default(),
            splittype: SplitType::default(),
            folds: DEFAULT_FOLDS,
            seed: DEFAULT_SEED,
            runs: DEFAULT_RUNS,
            percentage: DEFAULT_PERCENTAGE,
            randomized: DEFAULT_RANDOMIZED,
            stratified: DEFAULT_STRATIFIED,
            workers: None,
        }
    }

    /// Build a spec from raw settings; malformed values fall back to defaults.
    pub fn from_settings(
        classifiers: Vec<ClassifierSpec>,
        settings: &ExperimentSettings,
    ) -> (Self, Vec<ConfigWarning>) {
        let mut w = Vec::new();
        let workers = settings.workers.as_ref().map(|raw| {
            parse_or_default("workers", Some(raw), 0usize, &mut w)
        });
        let spec = Self {
            classifiers,
            exptype: parse_or_default("exptype", settings.exptype.as_ref(), ExpType::default(), &mut w),
            splittype: parse_or_default(
                "splittype",
                settings.splittype.as_ref(),
                SplitType::default(),
                &mut w,
            ),
            folds: parse_or_default("folds", settings.folds.as_ref(), DEFAULT_FOLDS, &mut w),
            seed: parse_or_default("seed", settings.seed.as_ref(), DEFAULT_SEED, &mut w),
            runs: parse_or_default("runs", settings.runs.as_ref(), DEFAULT_RUNS, &mut w),
            percentage: parse_or_default(
                "percentage",
                settings.percentage.as_ref(),
                DEFAULT_PERCENTAGE,
                &mut w,
            ),
            randomized: parse_or_default(
                "randomized",
                settings.randomized.as_ref(),
                DEFAULT_RANDOMIZED,
                &mut w,
            ),
            stratified: parse_or_default(
                "stratified",
                settings.stratified.as_ref(),
                DEFAULT_STRATIFIED,
                &mut w,
            ),
            // 0 means "auto"
            workers: workers.filter(|&n| n > 0),
        };
        (spec, w)
    }

    pub fn with_folds(mut self, folds: usize) -> Self {
        self.folds = folds;
        self
    }

    pub fn with_runs(mut self, runs: usize) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_percentage(mut self, percentage: f64, randomized: bool) -> Self {
        self.splittype = SplitType::RandomSplit;
        self.percentage = percentage;
        self.randomized = randomized;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Force the concurrent (custom) mode, as the `custom-experiment` command does.
    pub fn into_custom(mut self) -> Self {
        self.exptype = ExpType::Custom;
        self.splittype = SplitType::Custom;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        if self.exptype == ExpType::Custom || self.splittype == SplitType::Custom {
            ExecutionMode::Concurrent
        } else {
            ExecutionMode::Standard
        }
    }

    pub fn split_strategy(&self) -> SplitStrategy {
        match self.splittype {
            SplitType::RandomSplit => SplitStrategy::Percentage {
                percentage: self.percentage,
                randomized: self.randomized,
            },
            SplitType::CrossValidation | SplitType::Custom => SplitStrategy::CrossValidation {
                folds: self.folds,
                stratified: self.stratified,
            },
        }
    }

    /// Partitions evaluated per run and classifier.
    pub fn trials_per_run(&self) -> usize {
        match self.split_strategy() {
            SplitStrategy::CrossValidation { folds, .. } => folds,
            SplitStrategy::Percentage { .. } => 1,
        }
    }

    pub fn metric_set(&self) -> MetricSet {
        match self.exptype {
            ExpType::Regression => MetricSet::WithErrors,
            ExpType::Classification | ExpType::Custom => MetricSet::Classification,
        }
    }

    /// Worker pool size: the configured value or the available parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .min(MAX_WORKERS)
    }

    /// Replace out-of-range values with defaults.
    ///
    /// The percentage is left alone: an out-of-range percentage is rejected by
    /// the partitioner as a configuration error.
    pub fn sanitized(&self) -> (Self, Vec<ConfigWarning>) {
        let mut spec = self.clone();
        let mut warnings = Vec::new();
        let mut fallback = |field: &str, value: String, default: String, reason: &str| {
            let warning = ConfigWarning {
                field: field.to_string(),
                value,
                fallback: default,
                reason: reason.to_string(),
            };
            tracing::warn!("{warning}");
            warnings.push(warning);
        };

        if spec.folds < 2 {
            fallback("folds", spec.folds.to_string(), DEFAULT_FOLDS.to_string(), "must be >= 2");
            spec.folds = DEFAULT_FOLDS;
        }
        if spec.runs == 0 {
            fallback("runs", "0".into(), DEFAULT_RUNS.to_string(), "must be >= 1");
            spec.runs = DEFAULT_RUNS;
        }
        if spec.runs > MAX_RUNS {
            let reason = format!("must be <= {MAX_RUNS}");
            fallback("runs", spec.runs.to_string(), DEFAULT_RUNS.to_string(), &reason);
            spec.runs = DEFAULT_RUNS;
        }
        let tasks = spec
            .runs
            .saturating_mul(spec.trials_per_run())
            .saturating_mul(spec.classifiers.len());
        if tasks > MAX_TASKS && spec.runs > DEFAULT_RUNS {
            let reason = format!("classifiers x runs x folds must be <= {MAX_TASKS}");
            fallback("runs", spec.runs.to_string(), DEFAULT_RUNS.to_string(), &reason);
            spec.runs = DEFAULT_RUNS;
        }
        match spec.workers {
            Some(0) => {
                fallback("workers", "0".into(), "auto".into(), "must be >= 1");
                spec.workers = None;
            }
            Some(n) if n > MAX_WORKERS => {
                let reason = format!("must be <= {MAX_WORKERS}");
                fallback("workers", n.to_string(), "auto".into(), &reason);
                spec.workers = None;
            }
            _ => {}
        }
        (spec, warnings)
    }
}
