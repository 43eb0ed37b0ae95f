//! Local persistence for state that outlives a run.
//!
//! Everything lives under the state directory:
//!
//! ```text
//! <state-dir>/
//!   state.sqlite       # circuit_state table, one row per operation-class
//!   runs/<uuid>.json   # Finished run snapshots
//!   run.lock           # Held while a run is active
//! ```
//!
//! Loading and saving are explicit calls made by the `run` command at process
//! boundaries. Nothing here is touched implicitly during a run.

mod circuit;
mod lock;
mod run;

use std::{fs, io, path::PathBuf};

use uuid::Uuid;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("corrupt state: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// File-based storage rooted at the state directory.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates a new storage instance rooted at the given directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn db_path(&self) -> PathBuf {
        self.root.join("state.sqlite")
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join("run.lock")
    }
}
