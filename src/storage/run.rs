//! Run snapshots: one pretty JSON file per finished run.

use std::{fs, io};

use uuid::Uuid;

use crate::model::RunContext;

use super::{Result, Storage, StorageError};

impl Storage {
    /// Writes a finished run's snapshot. Snapshots are never rewritten.
    pub fn save_run(&self, run: &RunContext) -> Result<()> {
        let dir = self.runs_dir();
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(run)?;
        fs::write(dir.join(format!("{}.json", run.run_id)), json)?;
        Ok(())
    }

    pub fn load_run(&self, id: Uuid) -> Result<RunContext> {
        let path = self.runs_dir().join(format!("{id}.json"));
        if !path.exists() {
            return Err(StorageError::RunNotFound(id));
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// All snapshots, oldest first.
    pub fn list_runs(&self) -> Result<Vec<RunContext>> {
        let mut runs = Vec::new();
        let entries = match fs::read_dir(self.runs_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let json = fs::read_to_string(&path)?;
                runs.push(serde_json::from_str(&json)?);
            }
        }
        runs.sort_by(|a: &RunContext, b: &RunContext| a.started_at.cmp(&b.started_at));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;
    use tempfile::TempDir;

    use crate::model::{ExitCode, RunStatus};

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("state")).unwrap();
        (dir, storage)
    }

    fn finished_run(second: i64) -> RunContext {
        let started = Timestamp::from_second(second).unwrap();
        let mut run = RunContext::new(Uuid::new_v4(), started);
        run.add_metric("prices_stored", 4, started);
        run.finish(RunStatus::Partial, ExitCode::Partial, started);
        run
    }

    #[test]
    fn save_and_load_run() {
        let (_dir, storage) = test_storage();
        let run = finished_run(1_700_000_000);
        storage.save_run(&run).unwrap();

        let loaded = storage.load_run(run.run_id).unwrap();
        assert_eq!(loaded.status, Some(RunStatus::Partial));
        assert_eq!(loaded.metric("prices_stored"), Some(4));
    }

    #[test]
    fn list_runs_sorted_by_start() {
        let (_dir, storage) = test_storage();
        let later = finished_run(1_700_000_100);
        let earlier = finished_run(1_700_000_000);
        storage.save_run(&later).unwrap();
        storage.save_run(&earlier).unwrap();

        let runs = storage.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, earlier.run_id);
    }

    #[test]
    fn list_runs_empty() {
        let (_dir, storage) = test_storage();
        assert!(storage.list_runs().unwrap().is_empty());
    }

    #[test]
    fn load_missing_run_fails() {
        let (_dir, storage) = test_storage();
        let err = storage.load_run(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StorageError::RunNotFound(_)));
    }
}
