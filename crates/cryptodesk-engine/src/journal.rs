use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::SecondsFormat;
use cryptodesk_models::cycle::{CycleOutcome, CycleRecord};
use rusqlite::Connection;
use thiserror::Error;

/// Append-only cycle journal. One row per cycle; rows are never updated.
pub const CYCLE_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS cycle_records (
    cycle_id    TEXT PRIMARY KEY,
    symbol      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    record_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cycle_records_symbol
    ON cycle_records (symbol, started_at);
";

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for completed cycle records.
#[async_trait]
pub trait CycleSink: Send + Sync {
    async fn record(&self, record: &CycleRecord) -> Result<(), JournalError>;
}

/// SQLite-backed journal in WAL mode, so a reader can follow a running bot.
pub struct SqliteJournal {
    conn: Mutex<Connection>,
}

impl SqliteJournal {
    /// Open (creating if needed) the journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CYCLE_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, JournalError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CYCLE_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn append(&self, record: &CycleRecord) -> Result<(), JournalError> {
        let json = serde_json::to_string(record)?;
        self.lock().execute(
            "INSERT INTO cycle_records \
             (cycle_id, symbol, started_at, finished_at, outcome, record_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.cycle_id.to_string(),
                record.symbol,
                record.started_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                record.finished_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                outcome_label(&record.outcome),
                json,
            ],
        )?;
        Ok(())
    }

    /// Most recent records for `symbol`, newest first.
    pub fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<CycleRecord>, JournalError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT record_json FROM cycle_records WHERE symbol = ?1 \
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![symbol, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut records = Vec::new();
        for json in rows {
            records.push(serde_json::from_str(&json?)?);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<usize, JournalError> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM cycle_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CycleSink for SqliteJournal {
    async fn record(&self, record: &CycleRecord) -> Result<(), JournalError> {
        self.append(record)
    }
}

/// Keeps records in memory. Used by `cycle` runs without a database and by tests.
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<CycleRecord>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CycleRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CycleSink for MemoryJournal {
    async fn record(&self, record: &CycleRecord) -> Result<(), JournalError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

fn outcome_label(outcome: &CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::Traded => "traded",
        CycleOutcome::NoTrade { .. } => "no_trade",
        CycleOutcome::Aborted { .. } => "aborted",
    }
}
