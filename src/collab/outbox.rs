//! Report delivery through the messenger outbox.
//!
//! Each delivery is one JSON file the messaging driver picks up and sends.
//! Files are written to a temporary name and renamed so the driver never
//! sees a partial message.

use std::fs;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::Serialize;

use crate::model::ReportArtifact;

use super::{CollaboratorError, Deliverer, Result};

/// A queued outgoing message, as the driver reads it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingMessage<'a> {
    recipient: &'a str,
    summary_text: &'a str,
    attachments: Vec<&'a Path>,
    queued_at: Timestamp,
}

/// Queues reports in the messenger outbox.
#[derive(Debug, Clone)]
pub struct OutboxDeliverer {
    outbox_dir: PathBuf,
    session_file: PathBuf,
}

impl OutboxDeliverer {
    pub fn new(outbox_dir: impl Into<PathBuf>, session_file: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
            session_file: session_file.into(),
        }
    }
}

impl Deliverer for OutboxDeliverer {
    fn deliver(&self, artifact: &ReportArtifact, recipient: &str) -> Result<()> {
        if !self.session_valid() {
            return Err(CollaboratorError::transient("messenger session not established"));
        }

        let now = Timestamp::now();
        let message = OutgoingMessage {
            recipient,
            summary_text: &artifact.summary_text,
            attachments: artifact
                .written
                .iter()
                .map(PathBuf::as_path)
                .chain(artifact.optional_pdf_ref.as_deref())
                .collect(),
            queued_at: now,
        };
        let json = serde_json::to_string_pretty(&message)
            .map_err(|e| CollaboratorError::permanent(e.to_string()))?;

        let io = |e: std::io::Error| CollaboratorError::transient(e.to_string());
        fs::create_dir_all(&self.outbox_dir).map_err(io)?;
        let name = format!("report-{}", now.as_millisecond());
        let tmp = self.outbox_dir.join(format!("{name}.tmp"));
        let path = self.outbox_dir.join(format!("{name}.json"));
        fs::write(&tmp, json).map_err(io)?;
        fs::rename(&tmp, &path).map_err(io)?;

        tracing::debug!(path = %path.display(), "report queued for delivery");
        Ok(())
    }

    fn session_valid(&self) -> bool {
        self.session_file.is_file()
    }
}
