//! Binary field transcoding between storage and in-memory encodings
//!
//! Two script fields carry opaque bytes: `masscan.raw` and `screendata`.
//! Stores keep them as text (base64 by default); the pipeline works on raw
//! bytes. Scan records are decoded when they enter a grouper and every view
//! is re-encoded when it leaves the merge scheduler.

use super::model::HostView;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinaryField {
    /// Storage encoding (text produced by a `BinaryCodec`)
    Encoded(String),
    /// Canonical in-memory encoding
    Bytes(Vec<u8>),
}

impl BinaryField {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BinaryField::Bytes(bytes) => Some(bytes),
            BinaryField::Encoded(_) => None,
        }
    }

    pub fn to_storage(&mut self, codec: &dyn BinaryCodec) {
        if let BinaryField::Bytes(bytes) = self {
            *self = BinaryField::Encoded(codec.encode(bytes));
        }
    }

    pub fn to_canonical(&mut self, codec: &dyn BinaryCodec) {
        if let BinaryField::Encoded(text) = self {
            match codec.decode(text) {
                Some(bytes) => *self = BinaryField::Bytes(bytes),
                None => log::debug!("Leaving undecodable {} blob as-is", codec.name()),
            }
        }
    }
}

pub trait BinaryCodec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, bytes: &[u8]) -> String;
    fn decode(&self, text: &str) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl BinaryCodec for Base64Codec {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    fn decode(&self, text: &str) -> Option<Vec<u8>> {
        STANDARD.decode(text.trim()).ok()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HexCodec;

impl BinaryCodec for HexCodec {
    fn name(&self) -> &'static str {
        "hex"
    }

    fn encode(&self, bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(&self, text: &str) -> Option<Vec<u8>> {
        hex::decode(text.trim()).ok()
    }
}

pub fn codec_by_name(name: &str) -> Option<Arc<dyn BinaryCodec>> {
    match name.to_lowercase().as_str() {
        "base64" | "b64" => Some(Arc::new(Base64Codec)),
        "hex" => Some(Arc::new(HexCodec)),
        _ => None,
    }
}

fn for_each_binary_field(view: &mut HostView, mut apply: impl FnMut(&mut BinaryField)) {
    for port in view.ports.iter_mut() {
        for script in port.scripts.iter_mut() {
            if let Some(raw) = script.masscan.as_mut().and_then(|m| m.raw.as_mut()) {
                apply(raw);
            }
            if let Some(screendata) = script.screendata.as_mut() {
                apply(screendata);
            }
        }
    }
}

/// Re-encode binary fields for a sink
pub fn to_storage(view: &mut HostView, codec: &dyn BinaryCodec) {
    for_each_binary_field(view, |field| field.to_storage(codec));
}

/// Decode binary fields coming from a store
pub fn to_canonical(view: &mut HostView, codec: &dyn BinaryCodec) {
    for_each_binary_field(view, |field| field.to_canonical(codec));
}
