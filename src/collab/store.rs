//! `SQLite`-backed price store.
//!
//! One `daily_prices` row per `(product, vendor, date)`. Storing the same
//! price set twice leaves the table unchanged.

use std::path::PathBuf;

use jiff::Timestamp;
use rusqlite::Connection;

use crate::model::ValidatedPrice;

use super::{CollaboratorError, PriceStore, Result};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS daily_prices (
        product    TEXT NOT NULL,
        vendor     TEXT NOT NULL,
        date       TEXT NOT NULL,
        price      REAL NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (product, vendor, date)
    );
    CREATE INDEX IF NOT EXISTS idx_daily_prices_date ON daily_prices(date);
";

/// Price records in a single `SQLite` file.
#[derive(Debug, Clone)]
pub struct SqlitePriceStore {
    path: PathBuf,
}

impl SqlitePriceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CollaboratorError::transient(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Number of stored rows.
    #[cfg(test)]
    pub fn count(&self) -> Result<usize> {
        let conn = self.open()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM daily_prices", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Stored prices for one date, lowest first.
    #[cfg(test)]
    pub fn prices_on(&self, date: &str) -> Result<Vec<ValidatedPrice>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT product, vendor, date, price FROM daily_prices
             WHERE date = ?1 ORDER BY product, price",
        )?;
        let rows = stmt.query_map([date], |row| {
            Ok(ValidatedPrice {
                product: row.get(0)?,
                vendor: row.get(1)?,
                date: row.get(2)?,
                price: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl PriceStore for SqlitePriceStore {
    fn store(&self, prices: &[ValidatedPrice]) -> Result<usize> {
        let mut conn = self.open()?;
        let now = Timestamp::now().to_string();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO daily_prices (product, vendor, date, price, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(product, vendor, date)
                 DO UPDATE SET price = excluded.price, updated_at = excluded.updated_at",
            )?;
            for p in prices {
                stmt.execute(rusqlite::params![&p.product, &p.vendor, &p.date, p.price, &now])?;
            }
        }
        tx.commit()?;
        Ok(prices.len())
    }

    fn check_writable(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;")?;
        Ok(())
    }
}
