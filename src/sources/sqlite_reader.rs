//! SQLite record readers with keyset cursor
//!
//! Both tables carry a 16-byte big-endian `addr_key` BLOB, so ordering by
//! `addr_key` is numeric address order. Pages of 1000 rows are fetched on
//! demand with a `(addr_key, id)` cursor; rows without a key are never read.

use super::error::SourceError;
use super::filter::RecordFilter;
use crate::sqlite_pragma::apply_optimized_pragmas;
use crate::view_core::{Observation, ScanRecord};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::path::Path;

const PAGE_SIZE: i64 = 1000;
pub const PASSIVE_TABLE: &str = "passive";
pub const ACTIVE_TABLE: &str = "nmap";

/// Create the source tables if they do not exist
pub fn init_source_schema(conn: &Connection) -> Result<(), SourceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS passive (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            addr_key BLOB,
            sensor TEXT,
            recontype TEXT NOT NULL,
            document TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_passive_addr ON passive(addr_key, id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS nmap (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            addr_key BLOB,
            document TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nmap_addr ON nmap(addr_key, id)",
        [],
    )?;
    Ok(())
}

pub fn insert_observation(conn: &Connection, obs: &Observation) -> Result<i64, SourceError> {
    let document = serde_json::to_string(obs)?;
    conn.execute(
        "INSERT INTO passive (addr_key, sensor, recontype, document) VALUES (?1, ?2, ?3, ?4)",
        params![
            obs.addr.map(|a| a.to_key_bytes().to_vec()),
            obs.sensor,
            obs.recontype,
            document
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_scan(conn: &Connection, scan: &ScanRecord) -> Result<i64, SourceError> {
    let document = serde_json::to_string(scan)?;
    conn.execute(
        "INSERT INTO nmap (addr_key, document) VALUES (?1, ?2)",
        params![scan.addr.map(|a| a.to_key_bytes().to_vec()), document],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Address-ordered document reader over one table
pub struct SqliteRecordReader<T> {
    conn: Connection,
    table: &'static str,
    clause: String,
    filter_params: Vec<SqlValue>,
    cursor: (Vec<u8>, i64),
    buffer: VecDeque<T>,
    exhausted: bool,
    skipped: u64,
    _record: PhantomData<fn() -> T>,
}

pub type SqliteObservationReader = SqliteRecordReader<Observation>;
pub type SqliteScanReader = SqliteRecordReader<ScanRecord>;

fn open_connection(db_path: &Path) -> Result<Connection, SourceError> {
    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    init_source_schema(&conn)?;
    // Read-only from here on (must come after PRAGMAs and schema)
    conn.execute_batch("PRAGMA query_only = ON")?;
    Ok(conn)
}

impl SqliteRecordReader<Observation> {
    /// Open the passive table, pushing the filter into SQL
    pub fn open(db_path: impl AsRef<Path>, filter: &RecordFilter) -> Result<Self, SourceError> {
        let conn = open_connection(db_path.as_ref())?;
        let mut clause = String::new();
        let mut filter_params = Vec::new();
        if let Some(sensor) = &filter.sensor {
            filter_params.push(SqlValue::Text(sensor.clone()));
            clause.push_str(&format!(" AND sensor = ?{}", filter_params.len() + 2));
        }
        if let Some(recontypes) = &filter.recontypes {
            let mut placeholders = Vec::with_capacity(recontypes.len());
            for recontype in recontypes {
                filter_params.push(SqlValue::Text(recontype.clone()));
                placeholders.push(format!("?{}", filter_params.len() + 2));
            }
            if placeholders.is_empty() {
                clause.push_str(" AND 0");
            } else {
                clause.push_str(&format!(" AND recontype IN ({})", placeholders.join(", ")));
            }
        }
        log::info!(
            "📥 Passive SQLite reader opened: {}",
            db_path.as_ref().display()
        );
        Ok(Self::with_table(conn, PASSIVE_TABLE, clause, filter_params))
    }
}

impl SqliteRecordReader<ScanRecord> {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let conn = open_connection(db_path.as_ref())?;
        log::info!(
            "📥 Active SQLite reader opened: {}",
            db_path.as_ref().display()
        );
        Ok(Self::with_table(conn, ACTIVE_TABLE, String::new(), Vec::new()))
    }
}

impl<T: DeserializeOwned> SqliteRecordReader<T> {
    fn with_table(
        conn: Connection,
        table: &'static str,
        clause: String,
        filter_params: Vec<SqlValue>,
    ) -> Self {
        Self {
            conn,
            table,
            clause,
            filter_params,
            cursor: (Vec::new(), 0),
            buffer: VecDeque::with_capacity(PAGE_SIZE as usize),
            exhausted: false,
            skipped: 0,
            _record: PhantomData,
        }
    }

    /// Documents that failed to parse so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Fetch the next page into the buffer; returns the number of rows read
    fn fetch_page(&mut self) -> Result<usize, SourceError> {
        let sql = format!(
            "SELECT id, addr_key, document FROM {}
             WHERE addr_key IS NOT NULL
               AND (addr_key > ?1 OR (addr_key = ?1 AND id > ?2)){}
             ORDER BY addr_key, id
             LIMIT {}",
            self.table, self.clause, PAGE_SIZE
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;

        let mut values = vec![
            SqlValue::Blob(self.cursor.0.clone()),
            SqlValue::Integer(self.cursor.1),
        ];
        values.extend(self.filter_params.iter().cloned());

        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut count = 0;
        for row in rows {
            let (id, addr_key, document) = row?;
            count += 1;
            match serde_json::from_str::<T>(&document) {
                Ok(record) => self.buffer.push_back(record),
                Err(e) => {
                    self.skipped += 1;
                    log::warn!("⚠️  Skipping malformed {} row id={}: {}", self.table, id, e);
                }
            }
            self.cursor = (addr_key, id);
        }

        log::debug!(
            "📥 Read {} rows from {}, cursor at id={}",
            count,
            self.table,
            self.cursor.1
        );
        Ok(count)
    }
}

impl<T: DeserializeOwned> Iterator for SqliteRecordReader<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while self.buffer.is_empty() && !self.exhausted {
            match self.fetch_page() {
                Ok(count) => self.exhausted = count < PAGE_SIZE as usize,
                Err(e) => {
                    log::error!("❌ {} reader stopped: {}", self.table, e);
                    self.exhausted = true;
                }
            }
        }
        self.buffer.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_observation(addr: &str, sensor: &str, recontype: &str) -> Observation {
        serde_json::from_value(serde_json::json!({
            "addr": addr,
            "recontype": recontype,
            "source": "TCP",
            "port": 22,
            "sensor": sensor,
            "firstseen": 1_600_000_000,
            "lastseen": 1_600_000_100,
            "schema_version": 3
        }))
        .unwrap()
    }

    fn create_test_db(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        init_source_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_passive_rows_come_back_in_numeric_order() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("passive.db");
        let conn = create_test_db(&db_path);
        for addr in ["10.0.0.1", "9.0.0.1", "2001:db8::1", "10.0.0.1", "192.168.1.1"] {
            insert_observation(&conn, &create_test_observation(addr, "TAP0", "OPEN_PORT")).unwrap();
        }
        let mut orphan = create_test_observation("10.0.0.2", "TAP0", "OPEN_PORT");
        orphan.addr = None;
        insert_observation(&conn, &orphan).unwrap();
        drop(conn);

        let reader = SqliteObservationReader::open(&db_path, &RecordFilter::default()).unwrap();
        let addrs: Vec<String> = reader.map(|o| o.addr.unwrap().to_string()).collect();
        assert_eq!(
            addrs,
            vec!["9.0.0.1", "10.0.0.1", "10.0.0.1", "192.168.1.1", "2001:db8::1"]
        );
    }

    #[test]
    fn test_filter_pushed_into_sql() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("passive.db");
        let conn = create_test_db(&db_path);
        insert_observation(&conn, &create_test_observation("10.0.0.1", "TAP0", "OPEN_PORT")).unwrap();
        insert_observation(&conn, &create_test_observation("10.0.0.2", "TAP1", "OPEN_PORT")).unwrap();
        insert_observation(&conn, &create_test_observation("10.0.0.3", "TAP1", "SSH_SERVER")).unwrap();
        drop(conn);

        let filter = RecordFilter::new(Some("TAP1".to_string()), Some(vec!["SSH_SERVER".to_string()]));
        let records: Vec<Observation> = SqliteObservationReader::open(&db_path, &filter).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].addr.unwrap().to_string(), "10.0.0.3");
        assert_eq!(records[0].firstseen.unwrap().timestamp(), 1_600_000_000);
    }

    #[test]
    fn test_pagination_spans_pages() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nmap.db");
        let mut conn = create_test_db(&db_path);
        let tx = conn.transaction().unwrap();
        for i in 0..2500u32 {
            let scan: ScanRecord = serde_json::from_value(serde_json::json!({
                "addr": format!("10.{}.{}.1", i / 256, i % 256),
                "schema_version": 18
            }))
            .unwrap();
            insert_scan(&tx, &scan).unwrap();
        }
        tx.commit().unwrap();
        drop(conn);

        let mut reader = SqliteScanReader::open(&db_path).unwrap();
        let records: Vec<ScanRecord> = reader.by_ref().collect();
        assert_eq!(records.len(), 2500);
        assert!(records.windows(2).all(|w| w[0].addr < w[1].addr));
        assert_eq!(reader.skipped(), 0);
    }

    #[test]
    fn test_malformed_document_is_skipped() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nmap.db");
        let conn = create_test_db(&db_path);
        let key = "10.0.0.1".parse::<crate::view_core::Address>().unwrap().to_key_bytes().to_vec();
        conn.execute(
            "INSERT INTO nmap (addr_key, document) VALUES (?1, ?2)",
            params![key, "{not json"],
        )
        .unwrap();
        drop(conn);

        let mut reader = SqliteScanReader::open(&db_path).unwrap();
        assert!(reader.next().is_none());
        assert_eq!(reader.skipped(), 1);
    }
}
