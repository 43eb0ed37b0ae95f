//! Run bookkeeping: steps, their outcomes, and the run as a whole.

use std::collections::BTreeMap;
use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pipeline step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Collect,
    Extract,
    ValidateStore,
    Report,
    Deliver,
}

impl Step {
    /// Every step, in the order the orchestrator runs them.
    pub const ALL: [Step; 5] = [
        Step::Collect,
        Step::Extract,
        Step::ValidateStore,
        Step::Report,
        Step::Deliver,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collect => "COLLECT",
            Self::Extract => "EXTRACT",
            Self::ValidateStore => "VALIDATE_STORE",
            Self::Report => "REPORT",
            Self::Deliver => "DELIVER",
        }
    }

    /// Lowercase name used for audit actions and config keys.
    pub fn key(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Extract => "extract",
            Self::ValidateStore => "store",
            Self::Report => "report",
            Self::Deliver => "deliver",
        }
    }

    /// Whether exhausting this step aborts the run.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::ValidateStore | Self::Report)
    }

    /// The breaker guarding this step, if it talks to an external collaborator.
    ///
    /// Guarded steps are also the only retried ones.
    pub fn operation_class(self) -> Option<&'static str> {
        match self {
            Self::Collect => Some("message-collection"),
            Self::ValidateStore => Some("price-storage"),
            Self::Deliver => Some("report-delivery"),
            Self::Extract | Self::Report => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,

    /// Rejected by an open breaker: no attempt was made.
    CircuitOpen,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
        }
    }
}

/// The recorded result of one step. Appended once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step: Step,
    pub status: StepStatus,
    pub attempts: u32,
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub finished_at: Timestamp,
}

/// Run-level result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,

    /// A non-fatal step failed or was skipped; the report was still produced.
    Partial,

    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        }
    }
}

/// Process exit code of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitCode {
    Success,
    Partial,

    /// Failed mid-pipeline; the next scheduled run may recover.
    Failed,

    /// Configuration or pre-flight failure, caught before COLLECT.
    Precondition,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Partial => 1,
            Self::Failed => 2,
            Self::Precondition => 3,
        }
    }
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => Self::Success,
            RunStatus::Partial => Self::Partial,
            RunStatus::Failed => Self::Failed,
        }
    }
}

/// A named measurement taken during the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub value: u64,
    pub timestamp: Timestamp,
}

/// One execution of the pipeline.
///
/// Owned by the orchestrator while the run is live; persisted as an
/// immutable snapshot once it finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,

    pub outcomes: Vec<StepOutcome>,
    pub metrics: BTreeMap<String, Metric>,

    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<ExitCode>,
}

impl RunContext {
    pub fn new(run_id: Uuid, started_at: Timestamp) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            outcomes: Vec::new(),
            metrics: BTreeMap::new(),
            warnings: Vec::new(),
            status: None,
            exit_code: None,
        }
    }

    /// First eight characters of the run id, for display.
    pub fn short_id(&self) -> String {
        self.run_id.to_string()[..8].to_string()
    }

    pub fn push_outcome(&mut self, outcome: StepOutcome) {
        debug_assert!(
            self.outcome(outcome.step).is_none(),
            "step {} recorded twice",
            outcome.step
        );
        self.outcomes.push(outcome);
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step == step)
    }

    pub fn add_metric(&mut self, name: &str, value: u64, timestamp: Timestamp) {
        self.metrics
            .insert(name.to_string(), Metric { value, timestamp });
    }

    pub fn metric(&self, name: &str) -> Option<u64> {
        self.metrics.get(name).map(|m| m.value)
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn finish(&mut self, status: RunStatus, exit_code: ExitCode, at: Timestamp) {
        self.status = Some(status);
        self.exit_code = Some(exit_code);
        self.finished_at = Some(at);
    }
}
