//! Schema version gate for incoming records

use std::fmt::Debug;

/// Version expected on passive observations
pub const PASSIVE_SCHEMA_VERSION: u32 = 3;

/// Version expected on active scan records; also stamped on emitted views
pub const ACTIVE_SCHEMA_VERSION: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Passive,
    Active,
}

impl RecordKind {
    pub fn expected_version(&self) -> u32 {
        match self {
            RecordKind::Passive => PASSIVE_SCHEMA_VERSION,
            RecordKind::Active => ACTIVE_SCHEMA_VERSION,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Passive => "passive",
            RecordKind::Active => "active",
        }
    }
}

pub fn version_matches(declared: Option<u32>, expected: u32) -> bool {
    declared == Some(expected)
}

/// Drops records whose schema version differs from the expected one
#[derive(Debug)]
pub struct SchemaGate {
    kind: RecordKind,
    rejected: u64,
}

impl SchemaGate {
    pub fn new(kind: RecordKind) -> Self {
        Self { kind, rejected: 0 }
    }

    /// Returns false (and logs a warning) when the record must be dropped
    pub fn admit<T: Debug>(&mut self, declared: Option<u32>, record: &T) -> bool {
        let expected = self.kind.expected_version();
        if version_matches(declared, expected) {
            return true;
        }
        self.rejected += 1;
        log::warn!(
            "Will not handle {} record with schema_version {} ({} needed) [{:?}]",
            self.kind.as_str(),
            declared.unwrap_or(0),
            expected,
            record
        );
        false
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }
}
