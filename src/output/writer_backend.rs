//! Writer backend trait for merged host views
//!
//! Defines the interface for writing views to different backends.

use crate::view_core::HostView;
use async_trait::async_trait;

#[derive(Debug)]
pub enum ViewWriterError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
}

impl From<std::io::Error> for ViewWriterError {
    fn from(err: std::io::Error) -> Self {
        ViewWriterError::Io(err)
    }
}

impl From<serde_json::Error> for ViewWriterError {
    fn from(err: serde_json::Error) -> Self {
        ViewWriterError::Serialization(err)
    }
}

impl From<rusqlite::Error> for ViewWriterError {
    fn from(err: rusqlite::Error) -> Self {
        ViewWriterError::Database(err.to_string())
    }
}

impl std::fmt::Display for ViewWriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewWriterError::Io(e) => write!(f, "IO error: {}", e),
            ViewWriterError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ViewWriterError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for ViewWriterError {}

/// Backend trait for writing host views
#[async_trait]
pub trait ViewWriterBackend: Send {
    /// Write a single view
    async fn write_view(&mut self, view: &HostView) -> Result<(), ViewWriterError>;

    /// Flush pending writes to storage
    async fn flush(&mut self) -> Result<(), ViewWriterError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
