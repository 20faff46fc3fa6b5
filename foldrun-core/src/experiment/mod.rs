//! Experiment engine: partitioning, per-run evaluation, orchestration and aggregation.

pub mod aggregate;
pub mod evaluator;
pub mod orchestrator;
pub mod partition;
pub mod spec;

pub use aggregate::{ClassifierSummary, MetricStat, MetricSummary, Summary, SummaryStatus, aggregate};
pub use evaluator::{Evaluator, MetricSet, Metrics, RunKey, RunOutcome, RunResult};
pub use orchestrator::{ExperimentOrchestrator, ExperimentReport};
pub use partition::{Partition, PartitionPlan, make_folds, make_split};
pub use spec::{
    ConfigWarning, ExecutionMode, ExpType, ExperimentSettings, ExperimentSpec, SettingValue,
    SplitStrategy, SplitType, parse_or_default,
};
