//! Audit entries: one immutable record per terminal event.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::run::{RunStatus, StepStatus};

/// Status of an audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failed,
    Skipped,
    CircuitOpen,
    Partial,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Partial => "PARTIAL",
        }
    }
}

impl From<StepStatus> for AuditStatus {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Success => Self::Success,
            StepStatus::Failed => Self::Failed,
            StepStatus::Skipped => Self::Skipped,
            StepStatus::CircuitOpen => Self::CircuitOpen,
        }
    }
}

impl From<RunStatus> for AuditStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => Self::Success,
            RunStatus::Partial => Self::Partial,
            RunStatus::Failed => Self::Failed,
        }
    }
}

/// A single line of the audit stream.
///
/// `digest` covers every other field, so an edited line no longer verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub run_id: Uuid,
    pub actor: String,
    pub action: String,
    pub status: AuditStatus,
    pub details: String,
    pub digest: String,
}

impl AuditEntry {
    pub fn new(
        run_id: Uuid,
        timestamp: Timestamp,
        actor: &str,
        action: &str,
        status: AuditStatus,
        details: impl Into<String>,
    ) -> Self {
        let mut entry = Self {
            timestamp,
            run_id,
            actor: actor.to_string(),
            action: action.to_string(),
            status,
            details: details.into(),
            digest: String::new(),
        };
        entry.digest = entry.compute_digest();
        entry
    }

    /// Whether the stored digest still matches the entry's content.
    pub fn verify(&self) -> bool {
        self.digest == self.compute_digest()
    }

    fn compute_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [
            self.timestamp.to_string().as_str(),
            &self.run_id.to_string(),
            &self.actor,
            &self.action,
            self.status.as_str(),
            &self.details,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        let hash = hex::encode(hasher.finalize());
        hash[..16].to_string()
    }
}
