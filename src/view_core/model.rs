//! Host view records and their parts
//!
//! A `HostView` is both the per-source fragment produced by extraction and
//! grouping and the fully merged record emitted by the scheduler.

use super::address::Address;
use super::codec::BinaryField;
use super::cpe::Cpe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Pseudo port number for host-level scripts (user agents, client TLS data)
pub const HOST_SCRIPTS_PORT: i32 = -1;

pub const STATE_UP: &str = "up";
pub const STATE_OPEN: &str = "open";
pub const REASON_PASSIVE: &str = "passive";

/// A fragment is a host view that has not finished merging yet
pub type Fragment = HostView;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostView {
    pub addr: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starttime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<Hostname>,
    #[serde(default, skip_serializing_if = "Addresses::is_empty")]
    pub addresses: Addresses,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpes: Vec<Cpe>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(default, skip_serializing_if = "OpenPorts::is_empty")]
    pub openports: OpenPorts,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub infos: Map<String, Value>,
}

impl HostView {
    pub fn new(addr: Address) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }

    /// True when no host facts were extracted (ports, hostnames, addresses, cpes)
    pub fn has_no_facts(&self) -> bool {
        self.ports.is_empty()
            && self.hostnames.is_empty()
            && self.addresses.is_empty()
            && self.cpes.is_empty()
    }

    pub fn is_up(&self) -> bool {
        self.state.as_deref() == Some(STATE_UP)
    }

    pub fn refresh_openports(&mut self) {
        self.openports = OpenPorts::from_ports(&self.ports);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_extrainfo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tunnel: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<Script>,
}

impl Port {
    /// Port seen open by passive capture
    pub fn passive_open(port: i32, protocol: &str) -> Self {
        Self {
            port,
            protocol: Some(protocol.to_string()),
            state_state: Some(STATE_OPEN.to_string()),
            state_reason: Some(REASON_PASSIVE.to_string()),
            ..Self::default()
        }
    }

    /// Host-level pseudo port carrying scripts only
    pub fn host_scripts(scripts: Vec<Script>) -> Self {
        Self {
            port: HOST_SCRIPTS_PORT,
            scripts,
            ..Self::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.port >= 0 && self.state_state.as_deref() == Some(STATE_OPEN)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasscanData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<BinaryField>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masscan: Option<MasscanData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screendata: Option<BinaryField>,
    /// Structured payload, conventionally keyed by the script id
    #[serde(flatten)]
    pub structured: Map<String, Value>,
}

impl Script {
    pub fn new(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Script whose structured payload sits under its own id
    pub fn keyed(id: impl Into<String>, output: impl Into<String>, payload: Value) -> Self {
        let mut script = Self::new(id, output);
        script.structured.insert(script.id.clone(), payload);
        script
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hostname {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addresses {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mac: Vec<String>,
}

impl Addresses {
    pub fn is_empty(&self) -> bool {
        self.mac.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolPorts {
    pub count: usize,
    pub ports: Vec<i32>,
}

/// Summary of open ports, derived from `ports`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPorts {
    #[serde(default)]
    pub count: usize,
    #[serde(flatten)]
    pub protocols: BTreeMap<String, ProtocolPorts>,
}

impl OpenPorts {
    pub fn from_ports(ports: &[Port]) -> Self {
        let mut summary = OpenPorts::default();
        for port in ports.iter().filter(|p| p.is_open()) {
            let protocol = port.protocol.clone().unwrap_or_else(|| "tcp".to_string());
            let entry = summary.protocols.entry(protocol).or_default();
            if !entry.ports.contains(&port.port) {
                entry.ports.push(port.port);
                entry.count += 1;
                summary.count += 1;
            }
        }
        for entry in summary.protocols.values_mut() {
            entry.ports.sort_unstable();
        }
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.protocols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openports_summary() {
        let ports = vec![
            Port::passive_open(443, "tcp"),
            Port::passive_open(22, "tcp"),
            Port::passive_open(53, "udp"),
            Port::host_scripts(vec![Script::new("http-user-agent", "curl/8.0")]),
            Port {
                port: 25,
                protocol: Some("tcp".to_string()),
                state_state: Some("closed".to_string()),
                ..Port::default()
            },
        ];

        let summary = OpenPorts::from_ports(&ports);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.protocols["tcp"].ports, vec![22, 443]);
        assert_eq!(summary.protocols["udp"].count, 1);
    }

    #[test]
    fn test_script_structured_payload_is_flattened() {
        let script = Script::keyed("http-user-agent", "curl/8.0", json!(["curl/8.0"]));
        let value = serde_json::to_value(&script).unwrap();
        assert_eq!(value["id"], "http-user-agent");
        assert_eq!(value["http-user-agent"], json!(["curl/8.0"]));

        let back: Script = serde_json::from_value(value).unwrap();
        assert_eq!(back, script);
    }

    #[test]
    fn test_empty_view_serializes_compactly() {
        let view = HostView::new("10.0.0.1".parse().unwrap());
        assert_eq!(serde_json::to_string(&view).unwrap(), r#"{"addr":"10.0.0.1"}"#);
        assert!(view.has_no_facts());
    }
}
