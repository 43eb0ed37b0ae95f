//! The run lock: at most one active run per state directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use fs2::FileExt;

use super::Storage;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another run holds {0}")]
    Held(PathBuf),

    #[error("cannot open lock file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Exclusive lock on `run.lock`. Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl Storage {
    /// Take the run lock without waiting.
    pub fn lock_run(&self) -> Result<RunLock, LockError> {
        let path = self.lock_path();
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::Held(path.clone()));
        }

        // Holder's pid, for whoever finds the lock held.
        file.set_len(0).map_err(io_err)?;
        writeln!(file, "{}", std::process::id()).map_err(io_err)?;

        Ok(RunLock { file, path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}
