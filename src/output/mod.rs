//! View sinks: JSONL file or SQLite table

pub mod jsonl_writer;
pub mod sqlite_writer;
pub mod writer;
pub mod writer_backend;

pub use jsonl_writer::JsonlViewWriter;
pub use sqlite_writer::SqliteViewWriter;
pub use writer::ViewWriter;
pub use writer_backend::{ViewWriterBackend, ViewWriterError};
