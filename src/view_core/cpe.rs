//! CPE values attached to a host, with the places they were found

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpe {
    #[serde(rename = "type")]
    pub kind: String,
    pub vendor: String,
    pub product: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub origins: Vec<String>,
}

impl Cpe {
    /// Parse `cpe:/<part>:<vendor>:<product>[:<version>]`
    pub fn parse(value: &str) -> Option<Self> {
        let body = value.strip_prefix("cpe:/")?;
        let mut fields = body.splitn(4, ':');
        let kind = fields.next().filter(|k| !k.is_empty())?;
        let vendor = fields.next()?;
        let product = fields.next()?;
        let version = fields.next().unwrap_or("");
        Some(Self {
            kind: kind.to_string(),
            vendor: vendor.to_string(),
            product: product.to_string(),
            version: version.to_string(),
            origins: Vec::new(),
        })
    }

    fn key(&self) -> (String, String, String, String) {
        (
            self.kind.clone(),
            self.vendor.clone(),
            self.product.clone(),
            self.version.clone(),
        )
    }
}

/// Origin path for CPEs derived from a port
pub fn port_origin(port: i32) -> String {
    format!("ports.port:{}", port)
}

/// Add CPE strings found at `origin`, consolidating duplicates
pub fn add_cpe_values(cpes: &mut Vec<Cpe>, origin: &str, values: &[String]) {
    let found: Vec<Cpe> = values
        .iter()
        .filter_map(|value| {
            let parsed = Cpe::parse(value);
            if parsed.is_none() {
                log::debug!("Ignoring malformed CPE {:?}", value);
            }
            parsed
        })
        .map(|mut cpe| {
            cpe.origins.push(origin.to_string());
            cpe
        })
        .collect();
    let existing = std::mem::take(cpes);
    *cpes = merge_cpes(existing, found);
}

/// Union of two CPE lists keyed by (type, vendor, product, version)
pub fn merge_cpes(left: Vec<Cpe>, right: Vec<Cpe>) -> Vec<Cpe> {
    let mut merged: BTreeMap<(String, String, String, String), BTreeSet<String>> = BTreeMap::new();
    for cpe in left.into_iter().chain(right) {
        let key = cpe.key();
        merged.entry(key).or_default().extend(cpe.origins);
    }
    merged
        .into_iter()
        .map(|((kind, vendor, product, version), origins)| Cpe {
            kind,
            vendor,
            product,
            version,
            origins: origins.into_iter().collect(),
        })
        .collect()
}
