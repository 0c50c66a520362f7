//! Line-delimited JSON record reader

use super::error::SourceError;
use super::filter::RecordFilter;
use crate::view_core::{Observation, ScanRecord};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::Path;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send>;

/// Iterator over one JSON document per line
///
/// Lines are read as raw bytes, so invalid UTF-8 counts as a malformed line.
/// Blank and malformed lines are skipped; an I/O error ends the stream.
pub struct JsonlReader<T, R: BufRead> {
    reader: R,
    line: Vec<u8>,
    label: String,
    line_no: u64,
    skipped: u64,
    predicate: Option<Predicate<T>>,
    _record: PhantomData<fn() -> T>,
}

pub type JsonlObservationReader = JsonlReader<Observation, BufReader<File>>;
pub type JsonlScanReader = JsonlReader<ScanRecord, BufReader<File>>;

impl<T: DeserializeOwned> JsonlReader<T, BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path.as_ref())?;
        log::info!("📖 Reading records from {}", path.as_ref().display());
        Ok(Self::from_reader(
            BufReader::new(file),
            path.as_ref().display().to_string(),
        ))
    }
}

impl<R: BufRead> JsonlReader<Observation, R> {
    /// Keep only observations matching the filter
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        if !filter.is_empty() {
            self.predicate = Some(Box::new(move |obs| filter.matches(obs)));
        }
        self
    }
}

impl<T: DeserializeOwned, R: BufRead> JsonlReader<T, R> {
    pub fn from_reader(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            line: Vec::new(),
            label: label.into(),
            line_no: 0,
            skipped: 0,
            predicate: None,
            _record: PhantomData,
        }
    }

    /// Malformed lines skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<T: DeserializeOwned, R: BufRead> Iterator for JsonlReader<T, R> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    log::error!(
                        "❌ Read error in {} after line {}: {}",
                        self.label,
                        self.line_no,
                        e
                    );
                    return None;
                }
            }
            self.line_no += 1;
            let trimmed = self.line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_slice::<T>(trimmed) {
                Ok(record) => {
                    if let Some(predicate) = &self.predicate {
                        if !predicate(&record) {
                            continue;
                        }
                    }
                    return Some(record);
                }
                Err(e) => {
                    self.skipped += 1;
                    log::warn!(
                        "⚠️  Skipping malformed line {} in {}: {}",
                        self.line_no,
                        self.label,
                        e
                    );
                }
            }
        }
    }
}
