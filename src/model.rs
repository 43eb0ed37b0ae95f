//! Core data model for pricewatch.
//!
//! These types cross component boundaries: the records flowing through the
//! pipeline, the run bookkeeping the orchestrator owns, the per-class
//! circuit state, and the audit entries written for every terminal event.

mod audit;
mod circuit;
mod price;
mod run;

pub use audit::{AuditEntry, AuditStatus};
pub use circuit::{BreakerState, CircuitState};
pub use price::{PriceCandidate, RawMessage, ReportArtifact, ValidatedPrice};
pub use run::{ExitCode, RunContext, RunStatus, Step, StepOutcome, StepStatus};
