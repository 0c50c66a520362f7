//! Passive observation to host fragment extraction
//!
//! Dispatch is two-level: `ObservationKind` first, then `SslSource` for the
//! SSL kinds. Every miss and every malformed payload resolves to an empty
//! fragment carrying only the address.

use super::cpe::{add_cpe_values, port_origin};
use super::fingerprint::{decode_nmap_data, BannerMatcher, NullMatcher, PatternMatcher};
use super::model::{HostView, Hostname, Port, Script};
use super::observation::{Observation, ObservationKind, SslSource};
use super::tls::{pem_from_der, render_certificate_output};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const PROBE_NULL: &str = "NULL";
const PROBE_GET_REQUEST: &str = "GetRequest";

/// Maps passive observations to fragments
#[derive(Clone)]
pub struct ExtractorRegistry {
    matcher: Arc<dyn BannerMatcher>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new(Arc::new(PatternMatcher::builtin()))
    }
}

impl ExtractorRegistry {
    pub fn new(matcher: Arc<dyn BannerMatcher>) -> Self {
        Self { matcher }
    }

    /// Registry that never fingerprints banners
    pub fn without_fingerprints() -> Self {
        Self::new(Arc::new(NullMatcher))
    }

    /// Extract a fragment from one observation
    ///
    /// Unknown kinds and malformed payloads yield a fragment with no facts.
    pub fn extract(&self, obs: &Observation) -> HostView {
        let kind = obs.kind();
        let fragment = match kind {
            ObservationKind::HttpClientHeader => extract_http_client_header(obs),
            ObservationKind::HttpClientHeaderServer => extract_http_client_header_server(obs),
            ObservationKind::HttpServerHeader => self.extract_http_server_header(obs),
            ObservationKind::TcpServerBanner | ObservationKind::SshServer => {
                self.extract_tcp_server_banner(obs, kind)
            }
            ObservationKind::SshServerHostkey => extract_ssh_server_hostkey(obs),
            ObservationKind::SshClientHassh | ObservationKind::SshServerHassh => {
                extract_ssh_hassh(obs)
            }
            ObservationKind::SslServer => match SslSource::parse(obs.source_str()) {
                SslSource::Cert => extract_ssl_cert(obs, false, true),
                SslSource::CaCert => extract_ssl_cert(obs, true, true),
                SslSource::Ja3For(client) => extract_ssl_server_ja3(obs, &client),
                SslSource::Ja3 | SslSource::Other => None,
            },
            ObservationKind::SslClient => match SslSource::parse(obs.source_str()) {
                SslSource::Cert => extract_ssl_cert(obs, false, false),
                SslSource::CaCert => extract_ssl_cert(obs, true, false),
                SslSource::Ja3 => extract_ssl_client_ja3(obs),
                SslSource::Ja3For(_) | SslSource::Other => None,
            },
            ObservationKind::DnsAnswer => extract_dns_answer(obs),
            ObservationKind::MacAddress => extract_mac_address(obs),
            ObservationKind::OpenPort => extract_open_port(obs),
            ObservationKind::Unknown => None,
        };
        fragment.unwrap_or_else(|| empty_fragment(obs))
    }

    fn extract_http_server_header(&self, obs: &Observation) -> Option<HostView> {
        let mut port = Port::passive_open(obs.port?, obs.protocol_or_tcp());
        port.service_name = Some("http".to_string());
        let mut view = empty_fragment(obs);

        match obs.source_str() {
            "MICROSOFTSHAREPOINTTEAMSERVICES" => {
                let version = obs.value.split(':').next().unwrap_or_default();
                add_cpe_values(
                    &mut view.cpes,
                    &port_origin(port.port),
                    &[format!("cpe:/a:microsoft:sharepoint_server:{}", version)],
                );
                port.scripts.push(Script::keyed(
                    "http-app",
                    format!("SharePoint: path /UNKNOWN/, version {}", version),
                    json!([{"path": "/UNKNOWN/", "application": "SharePoint", "version": version}]),
                ));
            }
            "SERVER" => {
                port.scripts
                    .push(Script::new("http-server-header", obs.value.clone()));
                let mut banner = b"HTTP/1.1 200 OK\r\nServer: ".to_vec();
                banner.extend(decode_nmap_data(&obs.value));
                banner.extend_from_slice(b"\r\n\r\n");
                self.fingerprint(
                    &mut view,
                    &mut port,
                    &banner,
                    obs.protocol_or_tcp(),
                    PROBE_GET_REQUEST,
                );
            }
            _ => {}
        }

        view.ports.push(port);
        Some(view)
    }

    fn extract_tcp_server_banner(
        &self,
        obs: &Observation,
        kind: ObservationKind,
    ) -> Option<HostView> {
        let mut value = obs.value.clone();
        if kind == ObservationKind::SshServer {
            value.push_str("\r\n");
        }
        let mut port = Port::passive_open(obs.port?, obs.protocol_or_tcp());
        port.scripts.push(Script::new("banner", value.clone()));
        copy_service_infos(&obs.infos, &mut port);

        let mut view = empty_fragment(obs);
        let banner = decode_nmap_data(&value);
        self.fingerprint(&mut view, &mut port, &banner, obs.protocol_or_tcp(), PROBE_NULL);
        view.ports.push(port);
        Some(view)
    }

    fn fingerprint(
        &self,
        view: &mut HostView,
        port: &mut Port,
        banner: &[u8],
        protocol: &str,
        probe: &str,
    ) {
        let info = self.matcher.match_banner(banner, protocol, probe);
        if info.is_empty() {
            return;
        }
        add_cpe_values(&mut view.cpes, &port_origin(port.port), &info.cpes);
        info.apply_to(port);
    }
}

fn empty_fragment(obs: &Observation) -> HostView {
    HostView::new(obs.addr.unwrap_or_default())
}

fn with_ports(obs: &Observation, ports: Vec<Port>) -> HostView {
    let mut view = empty_fragment(obs);
    view.ports = ports;
    view
}

fn info_str<'a>(infos: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    infos.get(key).and_then(Value::as_str)
}

/// Service fields carried by a banner observation override the port's
fn copy_service_infos(infos: &Map<String, Value>, port: &mut Port) {
    for (key, value) in infos {
        let Some(text) = value.as_str() else {
            continue;
        };
        let slot = match key.as_str() {
            "service_name" => &mut port.service_name,
            "service_product" => &mut port.service_product,
            "service_version" => &mut port.service_version,
            "service_extrainfo" => &mut port.service_extrainfo,
            "service_tunnel" => &mut port.service_tunnel,
            _ => continue,
        };
        *slot = Some(text.to_string());
    }
}

fn extract_http_client_header(obs: &Observation) -> Option<HostView> {
    if obs.source_str() != "USER-AGENT" {
        return None;
    }
    let script = Script::keyed("http-user-agent", obs.value.clone(), json!([obs.value]));
    Some(with_ports(obs, vec![Port::host_scripts(vec![script])]))
}

fn extract_http_client_header_server(obs: &Observation) -> Option<HostView> {
    let mut port = Port::passive_open(obs.port?, obs.protocol_or_tcp());
    port.service_name = Some("http".to_string());
    Some(with_ports(obs, vec![port]))
}

fn ssh_key_label(key_type: &str) -> String {
    if key_type == "ecdsa-sha2-nistp256" {
        return "ECDSA".to_string();
    }
    key_type
        .strip_prefix("ssh-")
        .unwrap_or(key_type)
        .to_uppercase()
}

fn extract_ssh_server_hostkey(obs: &Observation) -> Option<HostView> {
    let md5 = info_str(&obs.infos, "md5")?;
    let algo = info_str(&obs.infos, "algo")?;
    let fingerprint = hex::decode(md5).ok()?;
    let key = STANDARD.encode(decode_nmap_data(&obs.value));

    let mut entry = json!({"type": algo, "key": key, "fingerprint": md5});
    let bits = obs.infos.get("bits").cloned();
    if let Some(bits) = &bits {
        entry["bits"] = bits.clone();
    }
    let bits_label = match bits {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s,
        _ => "-".to_string(),
    };
    let colon_fingerprint = fingerprint
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":");
    let output = format!(
        "\n  {} {} ({})\n{} {}",
        bits_label,
        colon_fingerprint,
        ssh_key_label(algo),
        algo,
        key
    );

    let mut port = Port::passive_open(obs.port?, obs.protocol_or_tcp());
    port.service_name = Some("ssh".to_string());
    port.scripts.push(Script::keyed("ssh-hostkey", output, json!([entry])));
    Some(with_ports(obs, vec![port]))
}

const HASSH_SECTIONS: [&str; 4] = [
    "kex_algorithms",
    "encryption_algorithms",
    "mac_algorithms",
    "compression_algorithms",
];

fn extract_ssh_hassh(obs: &Observation) -> Option<HostView> {
    let raw = info_str(&obs.infos, "raw")?;
    let sha1 = info_str(&obs.infos, "sha1")?;
    let sha256 = info_str(&obs.infos, "sha256")?;
    let lists: Vec<Vec<&str>> = raw.split(';').map(|v| v.split(',').collect()).collect();
    if lists.len() != HASSH_SECTIONS.len() {
        return None;
    }

    let mut structured = Map::new();
    let mut output = Vec::new();
    for (section, algorithms) in HASSH_SECTIONS.iter().zip(&lists) {
        output.push(format!("  {} ({})", section, algorithms.len()));
        output.extend(algorithms.iter().map(|a| format!("      {}", a)));
        structured.insert(section.to_string(), json!(algorithms));
    }
    structured.insert(
        "hassh".to_string(),
        json!({"version": "1.1", "raw": raw, "md5": obs.value, "sha1": sha1, "sha256": sha256}),
    );
    output.extend([
        String::new(),
        "  HASSH".to_string(),
        "    version: 1.1".to_string(),
        format!("    raw: {}", raw),
        format!("    md5: {}", obs.value),
        format!("    sha1: {}", sha1),
        format!("    sha256: {}", sha256),
    ]);

    let script = Script::keyed("ssh2-enum-algos", output.join("\n"), Value::Object(structured));
    let mut port = match obs.port.filter(|p| *p != 0) {
        Some(number) => Port::passive_open(number, obs.protocol_or_tcp()),
        None => Port::host_scripts(Vec::new()),
    };
    port.service_name = Some("ssh".to_string());
    port.scripts.push(script);
    Some(with_ports(obs, vec![port]))
}

fn extract_ssl_cert(obs: &Observation, cacert: bool, server: bool) -> Option<HostView> {
    let mut port = if server {
        let mut port = Port::passive_open(obs.port?, obs.protocol_or_tcp());
        port.service_tunnel = Some("ssl".to_string());
        port
    } else {
        Port::host_scripts(Vec::new())
    };

    if obs.infos.is_empty() {
        // a client without certificate details tells us nothing
        if !server {
            return None;
        }
    } else {
        let mut info = obs.infos.clone();
        info.insert(
            "pem".to_string(),
            Value::String(pem_from_der(&decode_nmap_data(&obs.value))),
        );
        let output = render_certificate_output(&info);
        let id = if cacert { "ssl-cacert" } else { "ssl-cert" };
        port.scripts
            .push(Script::keyed(id, output, json!([Value::Object(info)])));
    }
    Some(with_ports(obs, vec![port]))
}

fn ja3_digests(infos: &Map<String, Value>, md5: &str) -> Option<Value> {
    Some(json!({
        "raw": info_str(infos, "raw")?,
        "sha256": info_str(infos, "sha256")?,
        "sha1": info_str(infos, "sha1")?,
        "md5": md5,
    }))
}

fn extract_ssl_server_ja3(obs: &Observation, client_md5: &str) -> Option<HostView> {
    let client_infos = obs.infos.get("client").and_then(Value::as_object)?;
    let mut info = ja3_digests(&obs.infos, &obs.value)?;
    info["client"] = ja3_digests(client_infos, client_md5)?;

    let mut port = Port::passive_open(obs.port?, obs.protocol_or_tcp());
    port.scripts.push(Script::keyed(
        "ssl-ja3-server",
        format!("{} - {}", obs.value, client_md5),
        json!([info]),
    ));
    Some(with_ports(obs, vec![port]))
}

fn extract_ssl_client_ja3(obs: &Observation) -> Option<HostView> {
    let info = ja3_digests(&obs.infos, &obs.value)?;
    let script = Script::keyed("ssl-ja3-client", obs.value.clone(), json!([info]));
    Some(with_ports(obs, vec![Port::host_scripts(vec![script])]))
}

fn extract_dns_answer(obs: &Observation) -> Option<HostView> {
    let kind = obs.source.as_deref()?.split('-').next()?.to_string();
    let domains = obs
        .infos
        .get("domain")?
        .as_array()?
        .iter()
        .map(|d| d.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;

    let mut view = empty_fragment(obs);
    view.hostnames.push(Hostname {
        name: obs.value.clone(),
        kind,
        domains,
    });
    Some(view)
}

fn extract_mac_address(obs: &Observation) -> Option<HostView> {
    if obs.value.is_empty() {
        return None;
    }
    let mut view = empty_fragment(obs);
    view.addresses.mac.push(obs.value.clone());
    Some(view)
}

fn extract_open_port(obs: &Observation) -> Option<HostView> {
    let protocol = obs
        .source
        .as_deref()
        .unwrap_or("tcp")
        .to_lowercase();
    Some(with_ports(obs, vec![Port::passive_open(obs.port?, &protocol)]))
}
