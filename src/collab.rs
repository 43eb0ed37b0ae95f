//! Contracts for the external collaborators the orchestrator drives.
//!
//! The orchestrator treats each one as an opaque operation. The submodules
//! hold the file-based implementations the binary ships with; the real
//! messaging and OCR automation sits on the other side of the inbox and
//! outbox directories.

mod extract;
mod inbox;
mod outbox;
mod report;
mod store;

use crate::model::{PriceCandidate, RawMessage, ReportArtifact, ValidatedPrice};
use crate::retry::Retryable;

pub use extract::KeywordExtractor;
pub use inbox::InboxCollector;
pub use outbox::OutboxDeliverer;
pub use report::TextReportRenderer;
pub use store::SqlitePriceStore;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// Network, session, or timing trouble. Worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("{0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }
}

impl Retryable for CollaboratorError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<rusqlite::Error> for CollaboratorError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref f, _)
                if matches!(
                    f.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::Transient(e.to_string())
            }
            other => Self::Permanent(other.to_string()),
        }
    }
}

pub type Result<T> = core::result::Result<T, CollaboratorError>;

/// Produces raw vendor messages.
pub trait Collector {
    /// Messages received from whitelisted senders.
    fn collect(&self, vendor_whitelist: &[String]) -> Result<Vec<RawMessage>>;
}

/// Pulls price mentions out of messages. Local, no I/O assumed.
pub trait Extractor {
    fn extract(&self, messages: &[RawMessage]) -> Result<Vec<PriceCandidate>>;
}

/// Persists validated prices.
pub trait PriceStore {
    /// Idempotent upsert keyed by `(product, vendor, date)`.
    /// Returns the number of rows written.
    fn store(&self, prices: &[ValidatedPrice]) -> Result<usize>;

    /// Whether the store is reachable and accepts writes.
    fn check_writable(&self) -> Result<()>;
}

/// Renders the daily report. Local.
pub trait ReportRenderer {
    fn render(&self, prices: &[ValidatedPrice]) -> Result<ReportArtifact>;
}

/// Sends the report to its recipient.
pub trait Deliverer {
    fn deliver(&self, artifact: &ReportArtifact, recipient: &str) -> Result<()>;

    /// Whether the delivery channel has an established session.
    fn session_valid(&self) -> bool;
}

/// Borrowed handles to every collaborator for one run.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub collector: &'a dyn Collector,
    pub extractor: &'a dyn Extractor,
    pub store: &'a dyn PriceStore,
    pub renderer: &'a dyn ReportRenderer,
    pub deliverer: &'a dyn Deliverer,
}
