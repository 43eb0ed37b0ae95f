//! Circuit state persistence: the keyed `circuit_state` table.

use std::collections::BTreeMap;

use jiff::Timestamp;
use rusqlite::Connection;

use crate::model::{BreakerState, CircuitState};

use super::{Result, Storage, StorageError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS circuit_state (
        class                TEXT PRIMARY KEY,
        state                TEXT NOT NULL,
        consecutive_failures INTEGER NOT NULL,
        opened_at            TEXT
    );
";

impl Storage {
    fn open_db(&self) -> Result<Connection> {
        let conn = Connection::open(self.db_path())?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Every persisted operation-class. Missing classes start CLOSED.
    pub fn load_circuits(&self) -> Result<BTreeMap<String, CircuitState>> {
        let conn = self.open_db()?;
        let mut stmt = conn.prepare(
            "SELECT class, state, consecutive_failures, opened_at FROM circuit_state",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut table = BTreeMap::new();
        for row in rows {
            let (class, state, consecutive_failures, opened_at) = row?;
            let state = BreakerState::parse(&state)
                .ok_or_else(|| StorageError::Corrupt(format!("{class}: unknown state {state:?}")))?;
            let opened_at = opened_at
                .map(|s| s.parse::<Timestamp>())
                .transpose()
                .map_err(|e| StorageError::Corrupt(format!("{class}: opened_at: {e}")))?;
            table.insert(
                class,
                CircuitState {
                    state,
                    consecutive_failures,
                    opened_at,
                },
            );
        }
        Ok(table)
    }

    /// Upsert every class in one transaction.
    pub fn save_circuits(&self, table: &BTreeMap<String, CircuitState>) -> Result<()> {
        let mut conn = self.open_db()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO circuit_state (class, state, consecutive_failures, opened_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(class) DO UPDATE SET
                     state = excluded.state,
                     consecutive_failures = excluded.consecutive_failures,
                     opened_at = excluded.opened_at",
            )?;
            for (class, c) in table {
                stmt.execute(rusqlite::params![
                    class,
                    c.state.as_str(),
                    c.consecutive_failures,
                    c.opened_at.map(|t| t.to_string()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("state")).unwrap();
        (dir, storage)
    }

    #[test]
    fn empty_table_loads_empty() {
        let (_dir, storage) = test_storage();
        assert!(storage.load_circuits().unwrap().is_empty());
    }

    #[test]
    fn save_and_load_circuits() {
        let (_dir, storage) = test_storage();
        let opened_at = Timestamp::from_second(1_700_000_000).unwrap();
        let mut table = BTreeMap::new();
        table.insert(
            "report-delivery".to_string(),
            CircuitState {
                state: BreakerState::Open,
                consecutive_failures: 3,
                opened_at: Some(opened_at),
            },
        );
        table.insert("message-collection".to_string(), CircuitState::default());

        storage.save_circuits(&table).unwrap();
        assert_eq!(storage.load_circuits().unwrap(), table);
    }

    #[test]
    fn saving_again_overwrites() {
        let (_dir, storage) = test_storage();
        let mut table = BTreeMap::new();
        table.insert(
            "price-storage".to_string(),
            CircuitState {
                state: BreakerState::Closed,
                consecutive_failures: 2,
                opened_at: None,
            },
        );
        storage.save_circuits(&table).unwrap();

        table.insert("price-storage".to_string(), CircuitState::default());
        storage.save_circuits(&table).unwrap();

        let loaded = storage.load_circuits().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["price-storage"].consecutive_failures, 0);
    }

    #[test]
    fn unknown_state_is_corrupt() {
        let (_dir, storage) = test_storage();
        storage
            .open_db()
            .unwrap()
            .execute(
                "INSERT INTO circuit_state VALUES ('x', 'SIDEWAYS', 0, NULL)",
                [],
            )
            .unwrap();

        let err = storage.load_circuits().unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }
}
