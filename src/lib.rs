pub mod config;
pub mod enrichment;
pub mod output;
pub mod sources;
pub mod sqlite_pragma;
pub mod view_core;
