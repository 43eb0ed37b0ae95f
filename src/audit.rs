//! The per-run audit stream.
//!
//! Each run appends to its own newline-delimited JSON file:
//!
//! ```text
//! <audit-dir>/<run-id>.jsonl
//! ```
//!
//! Recording is best-effort. A failed write is reported through `tracing`
//! and counted, but never returned to the caller.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

// Traits must be in scope for `.lines()` on BufReader and `.write_all()` on File.
use std::io::{self, BufRead, Write};

use jiff::Timestamp;
use uuid::Uuid;

use crate::model::{AuditEntry, AuditStatus};

/// Errors reading an audit stream back.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
}

/// Appends audit entries for one run.
pub struct AuditRecorder {
    run_id: Uuid,
    path: PathBuf,
    file: Mutex<Option<File>>,
    written: AtomicUsize,
    failed: AtomicUsize,
}

impl AuditRecorder {
    /// Open the stream for `run_id` under `audit_dir`.
    ///
    /// Never fails: if the file cannot be opened, every later record is
    /// reported as a write failure instead.
    pub fn open(audit_dir: &Path, run_id: Uuid) -> Self {
        let path = Self::path_for(audit_dir, run_id);
        let file = fs::create_dir_all(audit_dir)
            .and_then(|()| File::options().create(true).append(true).open(&path));
        let file = match file {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot open audit stream");
                None
            }
        };
        Self {
            run_id,
            path,
            file: Mutex::new(file),
            written: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn path_for(audit_dir: &Path, run_id: Uuid) -> PathBuf {
        audit_dir.join(format!("{run_id}.jsonl"))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build and append an entry for this run.
    pub fn log(
        &self,
        timestamp: Timestamp,
        actor: &str,
        action: &str,
        status: AuditStatus,
        details: impl Into<String>,
    ) {
        let entry = AuditEntry::new(self.run_id, timestamp, actor, action, status, details);
        self.record(&entry);
    }

    /// Append one entry as a single line.
    pub fn record(&self, entry: &AuditEntry) {
        match self.append(entry) {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    action = %entry.action,
                    status = entry.status.as_str(),
                    details = %entry.details,
                    error = %e,
                    "audit write failed"
                );
            }
        }
    }

    fn append(&self, entry: &AuditEntry) -> io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = file
            .as_mut()
            .ok_or_else(|| io::Error::other("audit stream is not open"))?;
        file.write_all(line.as_bytes())
    }

    /// Flush the stream to disk. Best-effort, like every write.
    pub fn flush(&self) {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = file.as_ref()
            && let Err(e) = f.sync_data()
        {
            tracing::error!(path = %self.path.display(), error = %e, "audit flush failed");
        }
    }

    /// Entries successfully appended so far.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    /// Entries that could not be appended.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Read a whole audit stream back, in append order.
pub fn load(path: &Path) -> Result<Vec<AuditEntry>, AuditError> {
    let reader = io::BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|source| AuditError::Json {
            line: i + 1,
            source,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Run ids that have an audit stream under `audit_dir`.
pub fn list_runs(audit_dir: &Path) -> Result<Vec<Uuid>, AuditError> {
    let entries = match fs::read_dir(audit_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut ids = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            ids.push(id);
        }
    }
    Ok(ids)
}
