//! View Core - Per-Host Aggregation Pipeline
//!
//! This module folds passive observations and active scan records into one
//! view record per host address.
//!
//! # Architecture
//!
//! ```text
//! Observation stream (sorted by addr) → SchemaGate → ExtractorRegistry ─┐
//!                                                                       ├→ SourceGrouper
//! ScanRecord stream (sorted by addr)  → SchemaGate → to_canonical ──────┘       ↓
//!                                                          (one fragment per address)
//!                                                                               ↓
//! N fragment streams → MergeScheduler (numeric frontier, HostCombiner) → to_storage
//!     ↓
//! HostView (one per address, strictly increasing)
//! ```

pub mod address;
pub mod builder;
pub mod codec;
pub mod cpe;
pub mod extractor;
pub mod fingerprint;
pub mod grouper;
pub mod merge;
pub mod model;
pub mod observation;
pub mod scheduler;
pub mod schema;
pub mod tls;

pub use address::{Address, AddressParseError};
pub use builder::ViewBuilder;
pub use codec::{codec_by_name, Base64Codec, BinaryCodec, BinaryField, HexCodec};
pub use cpe::Cpe;
pub use extractor::ExtractorRegistry;
pub use fingerprint::{BannerMatcher, MatchRule, NullMatcher, PartialPort, PatternMatcher};
pub use grouper::{ActiveAdapter, FragmentSource, GroupStats, PassiveAdapter, SourceGrouper};
pub use merge::{HostCombiner, MergeHostDocs};
pub use model::{Fragment, HostView, Hostname, OpenPorts, Port, Script};
pub use observation::{Observation, ObservationKind, ScanRecord, SslSource};
pub use scheduler::{FragmentStream, MergeScheduler, MergeStats};
pub use schema::{RecordKind, SchemaGate, ACTIVE_SCHEMA_VERSION, PASSIVE_SCHEMA_VERSION};
