//! Record sources: address-sorted streams of observations and scan records
//!
//! Paths ending in `.db`, `.sqlite` or `.sqlite3` open a SQLite reader; any
//! other path is read as JSONL.

pub mod error;
pub mod filter;
pub mod jsonl_reader;
pub mod sqlite_reader;

pub use error::SourceError;
pub use filter::RecordFilter;
pub use jsonl_reader::{JsonlObservationReader, JsonlReader, JsonlScanReader};
pub use sqlite_reader::{
    init_source_schema, insert_observation, insert_scan, SqliteObservationReader,
    SqliteRecordReader, SqliteScanReader,
};

use crate::view_core::{Observation, ScanRecord};
use std::path::Path;

pub type ObservationStream = Box<dyn Iterator<Item = Observation> + Send>;
pub type ScanStream = Box<dyn Iterator<Item = ScanRecord> + Send>;

pub fn is_sqlite_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("db") | Some("sqlite") | Some("sqlite3")
    )
}

pub fn open_passive(
    path: impl AsRef<Path>,
    filter: &RecordFilter,
) -> Result<ObservationStream, SourceError> {
    let path = path.as_ref();
    if is_sqlite_path(path) {
        Ok(Box::new(SqliteObservationReader::open(path, filter)?))
    } else {
        Ok(Box::new(JsonlObservationReader::open(path)?.with_filter(filter.clone())))
    }
}

pub fn open_active(path: impl AsRef<Path>) -> Result<ScanStream, SourceError> {
    let path = path.as_ref();
    if is_sqlite_path(path) {
        Ok(Box::new(SqliteScanReader::open(path)?))
    } else {
        Ok(Box::new(JsonlScanReader::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_backend_by_extension() {
        assert!(is_sqlite_path(&PathBuf::from("data/passive.db")));
        assert!(is_sqlite_path(&PathBuf::from("scan.sqlite3")));
        assert!(!is_sqlite_path(&PathBuf::from("data/passive.jsonl")));
        assert!(!is_sqlite_path(&PathBuf::from("noext")));
    }

    #[test]
    fn test_open_passive_jsonl_with_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passive.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"addr":"10.0.0.1","recontype":"OPEN_PORT","port":22,"sensor":"A","schema_version":3}"#,
                "\n",
                r#"{"addr":"10.0.0.2","recontype":"OPEN_PORT","port":22,"sensor":"B","schema_version":3}"#,
                "\n"
            ),
        )
        .unwrap();

        let filter = RecordFilter::new(Some("B".to_string()), None);
        let records: Vec<Observation> = open_passive(&path, &filter).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sensor.as_deref(), Some("B"));
    }
}
