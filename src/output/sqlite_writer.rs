//! SQLite writer for host views
//!
//! Views are upserted by address key, in batched transactions.

use super::writer_backend::{ViewWriterBackend, ViewWriterError};
use crate::sqlite_pragma::apply_optimized_pragmas;
use crate::view_core::HostView;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Instant;

pub struct SqliteViewWriter {
    conn: Connection,
    batch: Vec<HostView>,
    batch_size: usize,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl SqliteViewWriter {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, ViewWriterError> {
        if let Some(parent) = db_path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ViewWriterError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create database directory {}: {}", parent.display(), e),
                ))
            })?;
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS views (
                addr_key BLOB PRIMARY KEY,
                addr TEXT NOT NULL,
                state TEXT,
                starttime INTEGER,
                endtime INTEGER,
                document TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_views_endtime ON views(endtime DESC)",
            [],
        )?;

        log::info!("✅ SQLite view store initialized with WAL mode");

        Ok(Self {
            conn,
            batch: Vec::with_capacity(100),
            batch_size: 100,
            last_flush: Instant::now(),
            flush_interval_secs: 2,
        })
    }

    fn flush_batch(&mut self) -> Result<(), ViewWriterError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        for view in &self.batch {
            tx.execute(
                "INSERT INTO views (addr_key, addr, state, starttime, endtime, document, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(addr_key) DO UPDATE SET
                    addr = excluded.addr,
                    state = excluded.state,
                    starttime = excluded.starttime,
                    endtime = excluded.endtime,
                    document = excluded.document,
                    updated_at = excluded.updated_at",
                params![
                    view.addr.to_key_bytes().to_vec(),
                    view.addr.to_string(),
                    view.state,
                    view.starttime.map(|t| t.timestamp()),
                    view.endtime.map(|t| t.timestamp()),
                    serde_json::to_string(view)?,
                    now,
                ],
            )?;
        }
        tx.commit()?;

        log::debug!("✅ Flushed {} views to SQLite", self.batch.len());
        self.batch.clear();
        self.last_flush = Instant::now();
        Ok(())
    }
}

impl Drop for SqliteViewWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush_batch() {
            log::error!("❌ Failed to flush {} pending views on drop: {}", self.batch.len(), e);
        }
    }
}

#[async_trait]
impl ViewWriterBackend for SqliteViewWriter {
    async fn write_view(&mut self, view: &HostView) -> Result<(), ViewWriterError> {
        self.batch.push(view.clone());

        if self.batch.len() >= self.batch_size
            || self.last_flush.elapsed().as_secs() >= self.flush_interval_secs
        {
            self.flush_batch()?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ViewWriterError> {
        self.flush_batch()
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
