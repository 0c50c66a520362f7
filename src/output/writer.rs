//! Unified writer interface for host views
//!
//! Routes writes to either JSONL or SQLite backend based on configuration.

use super::jsonl_writer::JsonlViewWriter;
use super::sqlite_writer::SqliteViewWriter;
use super::writer_backend::{ViewWriterBackend, ViewWriterError};
use crate::config::BackendType;
use crate::view_core::HostView;
use std::path::Path;

/// Unified writer that routes to either JSONL or SQLite backend
pub enum ViewWriter {
    Jsonl(JsonlViewWriter),
    Sqlite(SqliteViewWriter),
}

impl ViewWriter {
    pub fn new(backend: BackendType, path: impl AsRef<Path>) -> Result<Self, ViewWriterError> {
        match backend {
            BackendType::Jsonl => Ok(ViewWriter::Jsonl(JsonlViewWriter::new(path)?)),
            BackendType::Sqlite => Ok(ViewWriter::Sqlite(SqliteViewWriter::new(path)?)),
        }
    }

    pub async fn write_view(&mut self, view: &HostView) -> Result<(), ViewWriterError> {
        match self {
            ViewWriter::Jsonl(w) => {
                w.write_view(view)?;
                Ok(())
            }
            ViewWriter::Sqlite(w) => w.write_view(view).await,
        }
    }

    pub async fn flush(&mut self) -> Result<(), ViewWriterError> {
        match self {
            ViewWriter::Jsonl(w) => {
                w.flush()?;
                Ok(())
            }
            ViewWriter::Sqlite(w) => w.flush().await,
        }
    }

    pub fn backend_type(&self) -> &'static str {
        match self {
            ViewWriter::Jsonl(w) => w.backend_type(),
            ViewWriter::Sqlite(w) => w.backend_type(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_router_selects_backend() {
        let dir = tempdir().unwrap();
        let view = HostView::new("192.0.2.7".parse().unwrap());

        let mut jsonl = ViewWriter::new(BackendType::Jsonl, dir.path().join("view.jsonl")).unwrap();
        assert_eq!(jsonl.backend_type(), "JSONL");
        jsonl.write_view(&view).await.unwrap();
        jsonl.flush().await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("view.jsonl")).unwrap();
        assert_eq!(content.trim(), r#"{"addr":"192.0.2.7"}"#);

        let mut sqlite = ViewWriter::new(BackendType::Sqlite, dir.path().join("view.db")).unwrap();
        assert_eq!(sqlite.backend_type(), "SQLite");
        sqlite.write_view(&view).await.unwrap();
        sqlite.flush().await.unwrap();
    }
}
