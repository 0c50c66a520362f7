//! JSONL writer for host views - one document per line

use super::writer_backend::{ViewWriterBackend, ViewWriterError};
use crate::view_core::HostView;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

pub struct JsonlViewWriter {
    writer: BufWriter<File>,
    last_flush: Instant,
    written: u64,
}

impl JsonlViewWriter {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        log::info!("📝 Writing views to: {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            last_flush: Instant::now(),
            written: 0,
        })
    }

    pub fn write_view(&mut self, view: &HostView) -> std::io::Result<()> {
        let json = serde_json::to_string(view)?;
        writeln!(self.writer, "{}", json)?;
        self.written += 1;

        if self.last_flush.elapsed() > FLUSH_INTERVAL {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Drop for JsonlViewWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[async_trait]
impl ViewWriterBackend for JsonlViewWriter {
    async fn write_view(&mut self, view: &HostView) -> Result<(), ViewWriterError> {
        JsonlViewWriter::write_view(self, view)?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ViewWriterError> {
        JsonlViewWriter::flush(self)?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}
