//! Service fingerprinting of banners
//!
//! Banner-based extractors hand raw bytes to a `BannerMatcher` and fold the
//! returned service fields and CPEs into the port they build.

use super::model::Port;
use regex::bytes::Regex;
use serde::Deserialize;
use std::path::Path;

/// Service facts recovered from a banner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialPort {
    pub service_name: Option<String>,
    pub service_product: Option<String>,
    pub service_version: Option<String>,
    pub service_extrainfo: Option<String>,
    pub cpes: Vec<String>,
}

impl PartialPort {
    pub fn is_empty(&self) -> bool {
        self.service_name.is_none()
            && self.service_product.is_none()
            && self.service_version.is_none()
            && self.service_extrainfo.is_none()
            && self.cpes.is_empty()
    }

    /// Overwrite the port's service fields with the matched ones
    pub fn apply_to(&self, port: &mut Port) {
        if let Some(name) = &self.service_name {
            port.service_name = Some(name.clone());
        }
        if let Some(product) = &self.service_product {
            port.service_product = Some(product.clone());
        }
        if let Some(version) = &self.service_version {
            port.service_version = Some(version.clone());
        }
        if let Some(extrainfo) = &self.service_extrainfo {
            port.service_extrainfo = Some(extrainfo.clone());
        }
    }
}

pub trait BannerMatcher: Send + Sync {
    fn match_banner(&self, banner: &[u8], protocol: &str, probe: &str) -> PartialPort;
}

/// Matcher that never recognizes anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMatcher;

impl BannerMatcher for NullMatcher {
    fn match_banner(&self, _banner: &[u8], _protocol: &str, _probe: &str) -> PartialPort {
        PartialPort::default()
    }
}

/// One match rule; templates may reference capture groups as `${1}`
#[derive(Debug, Clone, Deserialize)]
pub struct MatchRule {
    pub probe: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub pattern: String,
    pub service: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub extrainfo: Option<String>,
    #[serde(default)]
    pub cpe: Option<String>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

struct CompiledRule {
    rule: MatchRule,
    regex: Regex,
}

/// First-match-wins rule list, in the spirit of service probe files
pub struct PatternMatcher {
    rules: Vec<CompiledRule>,
}

impl PatternMatcher {
    pub fn new(rules: Vec<MatchRule>) -> Result<Self, regex::Error> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern)?;
                Ok(CompiledRule { rule, regex })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Load rules from a JSON array of `MatchRule`
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let rules: Vec<MatchRule> = serde_json::from_str(&json)?;
        let matcher = Self::new(rules)?;
        log::info!(
            "🔎 Loaded {} banner rules from {}",
            matcher.len(),
            path.as_ref().display()
        );
        Ok(matcher)
    }

    pub fn builtin() -> Self {
        match Self::new(builtin_rules()) {
            Ok(matcher) => matcher,
            Err(e) => {
                log::error!("Built-in banner rules failed to compile: {}", e);
                Self { rules: Vec::new() }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn expand(captures: &regex::bytes::Captures<'_>, template: &Option<String>) -> Option<String> {
    let template = template.as_ref()?;
    let mut out = Vec::new();
    captures.expand(template.as_bytes(), &mut out);
    let text = String::from_utf8_lossy(&out).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

impl BannerMatcher for PatternMatcher {
    fn match_banner(&self, banner: &[u8], protocol: &str, probe: &str) -> PartialPort {
        for compiled in &self.rules {
            let rule = &compiled.rule;
            if rule.probe != probe || rule.protocol != protocol {
                continue;
            }
            if let Some(captures) = compiled.regex.captures(banner) {
                return PartialPort {
                    service_name: Some(rule.service.clone()),
                    service_product: expand(&captures, &rule.product),
                    service_version: expand(&captures, &rule.version),
                    service_extrainfo: expand(&captures, &rule.extrainfo),
                    cpes: expand(&captures, &rule.cpe).into_iter().collect(),
                };
            }
        }
        PartialPort::default()
    }
}

fn rule(
    probe: &str,
    pattern: &str,
    service: &str,
    product: &str,
    version: &str,
    cpe: &str,
) -> MatchRule {
    MatchRule {
        probe: probe.to_string(),
        protocol: default_protocol(),
        pattern: pattern.to_string(),
        service: service.to_string(),
        product: Some(product.to_string()),
        version: Some(version.to_string()),
        extrainfo: None,
        cpe: Some(cpe.to_string()),
    }
}

fn builtin_rules() -> Vec<MatchRule> {
    let mut openssh = rule(
        "NULL",
        r"^SSH-([\d.]+)-OpenSSH_([\w.]+)(?:[ -]([^\r\n]+))?\r?\n",
        "ssh",
        "OpenSSH",
        "${2}",
        "cpe:/a:openbsd:openssh:${2}",
    );
    openssh.extrainfo = Some("${3} protocol ${1}".to_string());
    vec![
        openssh,
        rule(
            "NULL",
            r"^SSH-([\d.]+)-dropbear_([\w.]+)\r?\n",
            "ssh",
            "Dropbear sshd",
            "${2}",
            "cpe:/a:matt_johnston:dropbear_ssh_server:${2}",
        ),
        rule(
            "GetRequest",
            r"(?s)^HTTP/1\.[01] \d\d\d .*?\r\nServer: Apache/([\d.]+)",
            "http",
            "Apache httpd",
            "${1}",
            "cpe:/a:apache:http_server:${1}",
        ),
        rule(
            "GetRequest",
            r"(?s)^HTTP/1\.[01] \d\d\d .*?\r\nServer: nginx/([\d.]+)",
            "http",
            "nginx",
            "${1}",
            "cpe:/a:igor_sysoev:nginx:${1}",
        ),
        rule(
            "GetRequest",
            r"(?s)^HTTP/1\.[01] \d\d\d .*?\r\nServer: Microsoft-IIS/([\d.]+)",
            "http",
            "Microsoft IIS httpd",
            "${1}",
            "cpe:/a:microsoft:internet_information_services:${1}",
        ),
    ]
}

/// Decode nmap-style escaped text (`\r`, `\n`, `\xHH`, ...) into bytes
pub fn decode_nmap_data(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let escaped = match bytes[i + 1] {
            b'0' => Some(0),
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b't' => Some(b'\t'),
            b'n' => Some(b'\n'),
            b'v' => Some(0x0b),
            b'f' => Some(0x0c),
            b'r' => Some(b'\r'),
            b'\\' => Some(b'\\'),
            _ => None,
        };
        if let Some(byte) = escaped {
            out.push(byte);
            i += 2;
            continue;
        }
        if bytes[i + 1] == b'x' && i + 3 < bytes.len() {
            if let Ok(decoded) = hex::decode(&bytes[i + 2..i + 4]) {
                out.push(decoded[0]);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openssh_banner() {
        let matcher = PatternMatcher::builtin();
        let info = matcher.match_banner(b"SSH-2.0-OpenSSH_8.4p1 Debian-5\r\n", "tcp", "NULL");

        assert_eq!(info.service_name.as_deref(), Some("ssh"));
        assert_eq!(info.service_product.as_deref(), Some("OpenSSH"));
        assert_eq!(info.service_version.as_deref(), Some("8.4p1"));
        assert_eq!(info.service_extrainfo.as_deref(), Some("Debian-5 protocol 2.0"));
        assert_eq!(info.cpes, vec!["cpe:/a:openbsd:openssh:8.4p1"]);
    }

    #[test]
    fn test_probe_and_protocol_must_match() {
        let matcher = PatternMatcher::builtin();
        assert!(matcher
            .match_banner(b"SSH-2.0-OpenSSH_8.4\r\n", "tcp", "GetRequest")
            .is_empty());
        assert!(matcher
            .match_banner(b"SSH-2.0-OpenSSH_8.4\r\n", "udp", "NULL")
            .is_empty());
    }

    #[test]
    fn test_http_server_header() {
        let matcher = PatternMatcher::builtin();
        let banner = b"HTTP/1.1 200 OK\r\nServer: nginx/1.18.0\r\n\r\n";
        let info = matcher.match_banner(banner, "tcp", "GetRequest");
        assert_eq!(info.service_product.as_deref(), Some("nginx"));
        assert_eq!(info.cpes, vec!["cpe:/a:igor_sysoev:nginx:1.18.0"]);
    }

    #[test]
    fn test_rules_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[{"probe":"NULL","pattern":"^220 ([\\w.-]+) ESMTP Postfix","service":"smtp","product":"Postfix smtpd","extrainfo":"host ${1}"}]"#,
        )
        .unwrap();

        let matcher = PatternMatcher::from_json_file(&path).unwrap();
        assert_eq!(matcher.len(), 1);
        let info = matcher.match_banner(b"220 mx.example.org ESMTP Postfix\r\n", "tcp", "NULL");
        assert_eq!(info.service_extrainfo.as_deref(), Some("host mx.example.org"));
        assert!(info.service_version.is_none());
    }

    #[test]
    fn test_decode_nmap_data() {
        assert_eq!(decode_nmap_data(r"SSH-2.0\r\n"), b"SSH-2.0\r\n".to_vec());
        assert_eq!(decode_nmap_data(r"\x00\xffA"), vec![0x00, 0xff, b'A']);
        assert_eq!(decode_nmap_data(r"a\\b"), b"a\\b".to_vec());
        assert_eq!(decode_nmap_data(r"trailing\"), b"trailing\\".to_vec());
    }
}
