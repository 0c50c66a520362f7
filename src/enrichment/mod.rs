//! Post-merge enrichment of host views

pub mod ipdata;

pub use ipdata::{enrich, enrich_view, AddressInfo, AddressInfoLookup, HttpIpData, LookupError};
