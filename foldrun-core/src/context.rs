//! Run context: start timestamps and the event sink an experiment reports to.

use crate::experiment::evaluator::RunKey;
use crate::experiment::spec::ConfigWarning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    Configured,
    Partitioning,
    Running,
    Aggregating,
    Done,
    Failed,
}

impl ExperimentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configured => "configured",
            Self::Partitioning => "partitioning",
            Self::Running => "running",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Something worth reporting while an experiment runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExperimentEvent {
    StateChanged {
        from: ExperimentState,
        to: ExperimentState,
        reason: Option<String>,
    },
    Warning {
        warning: ConfigWarning,
    },
    RunCompleted {
        key: RunKey,
        success: bool,
        elapsed_ms: u64,
    },
    Finished {
        total_runs: usize,
        failed_runs: usize,
        elapsed_ms: u64,
    },
}

/// Receives experiment events. Implementations must be cheap; they are
/// called from the collector loop.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ExperimentEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ExperimentEvent) {
        match event {
            ExperimentEvent::StateChanged { from, to, reason } => match reason {
                Some(reason) => tracing::info!(%from, %to, "Experiment state changed: {reason}"),
                None => tracing::info!(%from, %to, "Experiment state changed"),
            },
            ExperimentEvent::Warning { warning } => tracing::warn!("{warning}"),
            ExperimentEvent::RunCompleted {
                key,
                success,
                elapsed_ms,
            } => tracing::debug!(
                classifier = %key.classifier,
                run = key.run,
                fold = key.fold,
                success,
                elapsed_ms,
                "Run completed"
            ),
            ExperimentEvent::Finished {
                total_runs,
                failed_runs,
                elapsed_ms,
            } => tracing::info!(total_runs, failed_runs, elapsed_ms, "Experiment finished"),
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ExperimentEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExperimentEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// State transitions in the order they were emitted.
    pub fn transitions(&self) -> Vec<ExperimentState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ExperimentEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ExperimentEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// Per-experiment context handed to the orchestrator.
#[derive(Clone)]
pub struct ExperimentContext {
    pub id: Uuid,
    started: Instant,
    started_at: DateTime<Utc>,
    sink: Arc<dyn EventSink>,
}

impl ExperimentContext {
    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            started_at: Utc::now(),
            sink,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    pub fn emit(&self, event: ExperimentEvent) {
        self.sink.emit(&event);
    }

    pub fn warn(&self, warning: ConfigWarning) {
        self.emit(ExperimentEvent::Warning { warning });
    }
}

impl fmt::Debug for ExperimentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentContext")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
