//! Message collection from the messenger inbox.
//!
//! The messaging driver drops one JSON-encoded [`RawMessage`] per file into
//! the inbox directory. Collection reads them back, keeping only messages
//! from whitelisted senders.

use std::path::PathBuf;
use std::{fs, io};

use crate::model::RawMessage;
use crate::validate;

use super::{CollaboratorError, Collector, Result};

/// Reads vendor messages the messaging driver left in its inbox.
#[derive(Debug, Clone)]
pub struct InboxCollector {
    inbox_dir: PathBuf,
    session_file: PathBuf,
}

impl InboxCollector {
    pub fn new(inbox_dir: impl Into<PathBuf>, session_file: impl Into<PathBuf>) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
            session_file: session_file.into(),
        }
    }

    /// Whether the messaging driver holds an established session.
    pub fn session_valid(&self) -> bool {
        self.session_file.is_file()
    }
}

impl Collector for InboxCollector {
    fn collect(&self, vendor_whitelist: &[String]) -> Result<Vec<RawMessage>> {
        if !self.session_valid() {
            return Err(CollaboratorError::transient("messenger session not established"));
        }

        let entries = match fs::read_dir(&self.inbox_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CollaboratorError::transient(format!(
                    "inbox {} does not exist yet",
                    self.inbox_dir.display()
                )));
            }
            Err(e) => return Err(CollaboratorError::transient(e.to_string())),
        };

        let mut messages = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CollaboratorError::transient(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let json = fs::read_to_string(&path)
                .map_err(|e| CollaboratorError::transient(e.to_string()))?;
            let message: RawMessage = match serde_json::from_str(&json) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable message");
                    continue;
                }
            };

            let whitelisted = validate::phone(&message.sender)
                .is_ok_and(|sender| vendor_whitelist.contains(&sender));
            if whitelisted {
                messages.push(message);
            }
        }

        messages.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(messages)
    }
}
