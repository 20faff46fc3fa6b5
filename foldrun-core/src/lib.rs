//! # foldrun-core: repeatable classifier experiments over tabular data
//!
//! Loads a labeled dataset, trains the classifiers declared in a project
//! file, and evaluates them with k-fold cross-validation or a percentage
//! split. Experiments can repeat runs with derived seeds and execute every
//! (classifier, run, fold) trial concurrently on a bounded worker pool.
//!
//! The pipeline, leaf first:
//! - [`data`]: datasets, schemas and the CSV loader
//! - [`classifiers`]: the classifier capability and its registry
//! - [`experiment`]: partitioning, evaluation, orchestration, aggregation
//! - [`workbench`] and [`persist`]: full-dataset training, prediction and
//!   the model store

pub mod classifiers;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod experiment;
pub mod persist;
pub mod workbench;

pub use classifiers::{Classifier, ClassifierRegistry, ClassifierSpec, Model};
pub use config::{ProjectConfig, load_project_config};
pub use context::{EventSink, ExperimentContext, ExperimentEvent, ExperimentState, MemorySink, TracingSink};
pub use data::{CsvSource, Dataset, DatasetSchema};
pub use error::{ClassifierError, ExperimentError};
pub use experiment::{
    ExperimentOrchestrator, ExperimentReport, ExperimentSettings, ExperimentSpec, RunResult, Summary,
};
pub use persist::ModelStore;
pub use workbench::{Prediction, TrainedModel, Workbench};
