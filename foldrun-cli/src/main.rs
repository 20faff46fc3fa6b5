//! foldrun CLI: train, cross-validate and compare classifiers from a project file.

mod commands;

use clap::Parser;
use foldrun_core::experiment::{ExperimentSettings, SettingValue};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// foldrun: repeatable classifier experiments over tabular datasets
#[derive(Parser, Debug)]
#[command(name = "foldrun", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// What to do with the results.
#[derive(clap::Args, Debug, Clone, Default)]
struct OutputArgs {
    /// Print the summary (or model descriptions) to stdout
    #[arg(long)]
    print: bool,

    /// Write the summary (or model descriptions) to the output directory
    #[arg(long)]
    save: bool,

    /// Train every classifier on the full dataset and serialize the models
    #[arg(long)]
    ser: bool,
}

impl OutputArgs {
    /// Printing is the default when no output flag is given.
    fn print_or_default(&self) -> bool {
        self.print || !(self.save || self.ser)
    }
}

/// Experiment settings given on the command line.
///
/// Values are kept as text and parsed with the same fallback rules as the
/// project file, so a bad value logs a warning instead of aborting.
#[derive(clap::Args, Debug, Clone, Default)]
struct ExperimentArgs {
    /// classification, regression or custom
    #[arg(long)]
    exptype: Option<String>,

    /// crossvalidation, randomsplit or custom
    #[arg(long)]
    splittype: Option<String>,

    /// Number of cross-validation folds
    #[arg(long, allow_hyphen_values = true)]
    folds: Option<String>,

    /// Shuffle before a percentage split
    #[arg(long)]
    randomized: bool,

    /// Training share of a percentage split, e.g. 0.66
    #[arg(long, allow_hyphen_values = true)]
    percentage: Option<String>,

    /// Number of repeated runs
    #[arg(long, allow_hyphen_values = true)]
    runs: Option<String>,

    /// Base random seed
    #[arg(long, allow_hyphen_values = true)]
    seed: Option<String>,

    /// Worker pool size for concurrent runs
    #[arg(long, allow_hyphen_values = true)]
    workers: Option<String>,
}

impl ExperimentArgs {
    fn to_settings(&self) -> ExperimentSettings {
        let text = |v: &Option<String>| v.as_deref().map(SettingValue::from);
        ExperimentSettings {
            exptype: text(&self.exptype),
            splittype: text(&self.splittype),
            folds: text(&self.folds),
            seed: text(&self.seed),
            runs: text(&self.runs),
            percentage: text(&self.percentage),
            randomized: self.randomized.then_some(SettingValue::Bool(true)),
            stratified: None,
            workers: text(&self.workers),
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train every configured classifier on the full dataset
    Train {
        /// Project file
        config: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Run a single cross-validation
    Cross {
        /// Project file
        config: PathBuf,
        /// Number of folds
        #[arg(long, allow_hyphen_values = true)]
        fold: Option<String>,
        /// Random seed
        #[arg(long, allow_hyphen_values = true)]
        seed: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Run an experiment, one trial at a time
    Experiment {
        /// Project file
        config: PathBuf,
        #[command(flatten)]
        experiment: ExperimentArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Run an experiment with precomputed folds on the worker pool
    CustomExperiment {
        /// Project file
        config: PathBuf,
        #[command(flatten)]
        experiment: ExperimentArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Predict every row of a CSV dataset with a serialized model
    Predict {
        /// Serialized model (`.model.json`)
        model: PathBuf,
        /// CSV dataset with the model's attribute columns
        dataset: PathBuf,
        /// Write predictions here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// CSV delimiter
        #[arg(long, default_value_t = ',')]
        delimiter: char,
    },
    /// List the available classifiers and their hyperparameters
    Classifiers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let started = std::time::Instant::now();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "foldrun", "foldrun")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "foldrun.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let result = commands::handle_command(cli.command).await;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "foldrun finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_experiment_flags_become_raw_settings() {
        let cli = Cli::parse_from([
            "foldrun",
            "experiment",
            "project.toml",
            "--folds",
            "abc",
            "--randomized",
            "--percentage",
            "0.5",
            "--print",
        ]);
        let Commands::Experiment {
            experiment, output, ..
        } = cli.command
        else {
            panic!("expected experiment command");
        };
        let settings = experiment.to_settings();
        assert_eq!(settings.folds, Some(SettingValue::Text("abc".into())));
        assert_eq!(settings.randomized, Some(SettingValue::Bool(true)));
        assert_eq!(settings.runs, None);
        assert!(output.print);
        assert!(!output.ser);
    }

    #[test]
    fn test_print_is_default_output() {
        assert!(OutputArgs::default().print_or_default());
        let save_only = OutputArgs {
            save: true,
            ..Default::default()
        };
        assert!(!save_only.print_or_default());
    }

    #[test]
    fn test_global_verbosity() {
        let cli = Cli::parse_from(["foldrun", "classifiers", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Classifiers));
    }
}
