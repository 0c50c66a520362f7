//! Certificate script rendering

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

const PEM_LINE_WIDTH: usize = 64;

/// Wrap DER bytes into a PEM block (with a trailing newline)
pub fn pem_from_der(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut lines = vec!["-----BEGIN CERTIFICATE-----".to_string()];
    lines.extend(
        encoded
            .as_bytes()
            .chunks(PEM_LINE_WIDTH)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned()),
    );
    lines.push("-----END CERTIFICATE-----".to_string());
    lines.push(String::new());
    lines.join("\n")
}

fn text_field<'a>(info: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    info.get(key).and_then(Value::as_str)
}

fn grouped_digest(digest: &str) -> String {
    digest
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable output for `ssl-cert` style scripts, in nmap's layout
pub fn render_certificate_output(info: &Map<String, Value>) -> String {
    let mut out = Vec::new();

    for (key, label) in [("subject_text", "Subject"), ("issuer_text", "Issuer")] {
        if let Some(text) = text_field(info, key) {
            out.push(format!("{}: {}", label, text));
        }
    }

    if let Some(pubkey) = info.get("pubkey").and_then(Value::as_object) {
        if let Some(kind) = text_field(pubkey, "type") {
            out.push(format!("Public Key type: {}", kind));
        }
        if let Some(bits) = pubkey.get("bits").and_then(Value::as_u64) {
            out.push(format!("Public Key bits: {}", bits));
        }
    }

    for (key, label) in [("not_before", "Not valid before"), ("not_after", "Not valid after")] {
        if let Some(text) = text_field(info, key) {
            out.push(format!("{}: {}", label, text));
        }
    }

    if let Some(sans) = info.get("san").and_then(Value::as_array) {
        for san in sans.iter().filter_map(Value::as_str) {
            out.push(format!("Subject Alternative Name: {}", san));
        }
    }

    for (key, label) in [("md5", "MD5:"), ("sha1", "SHA-1:"), ("sha256", "SHA-256:")] {
        if let Some(digest) = text_field(info, key) {
            out.push(format!("{:<9}{}", label, grouped_digest(digest)));
        }
    }

    if let Some(pem) = text_field(info, "pem") {
        out.extend(pem.lines().map(str::to_string));
    }

    out.join("\n")
}
