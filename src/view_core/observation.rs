//! Raw input records: passive observations and active scan records

use super::address::Address;
use super::cpe::Cpe;
use super::model::{Addresses, HostView, Hostname, Port};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One passive sighting, as stored by a passive sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub addr: Option<Address>,
    pub recontype: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub infos: Map<String, Value>,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub firstseen: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub lastseen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sensor: Option<String>,
    #[serde(default)]
    pub schema_version: Option<u32>,
}

impl Observation {
    pub fn kind(&self) -> ObservationKind {
        ObservationKind::from_recontype(&self.recontype)
    }

    pub fn source_str(&self) -> &str {
        self.source.as_deref().unwrap_or("")
    }

    pub fn protocol_or_tcp(&self) -> &str {
        self.protocol.as_deref().unwrap_or("tcp")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    HttpClientHeader,
    HttpClientHeaderServer,
    HttpServerHeader,
    SslServer,
    SslClient,
    DnsAnswer,
    SshServer,
    SshServerHostkey,
    SshClientHassh,
    SshServerHassh,
    TcpServerBanner,
    MacAddress,
    OpenPort,
    Unknown,
}

impl ObservationKind {
    pub fn from_recontype(recontype: &str) -> Self {
        match recontype {
            "HTTP_CLIENT_HEADER" => ObservationKind::HttpClientHeader,
            "HTTP_CLIENT_HEADER_SERVER" => ObservationKind::HttpClientHeaderServer,
            "HTTP_SERVER_HEADER" => ObservationKind::HttpServerHeader,
            "SSL_SERVER" => ObservationKind::SslServer,
            "SSL_CLIENT" => ObservationKind::SslClient,
            "DNS_ANSWER" => ObservationKind::DnsAnswer,
            "SSH_SERVER" => ObservationKind::SshServer,
            "SSH_SERVER_HOSTKEY" => ObservationKind::SshServerHostkey,
            "SSH_CLIENT_HASSH" => ObservationKind::SshClientHassh,
            "SSH_SERVER_HASSH" => ObservationKind::SshServerHassh,
            "TCP_SERVER_BANNER" => ObservationKind::TcpServerBanner,
            "MAC_ADDRESS" => ObservationKind::MacAddress,
            "OPEN_PORT" => ObservationKind::OpenPort,
            _ => ObservationKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::HttpClientHeader => "HTTP_CLIENT_HEADER",
            ObservationKind::HttpClientHeaderServer => "HTTP_CLIENT_HEADER_SERVER",
            ObservationKind::HttpServerHeader => "HTTP_SERVER_HEADER",
            ObservationKind::SslServer => "SSL_SERVER",
            ObservationKind::SslClient => "SSL_CLIENT",
            ObservationKind::DnsAnswer => "DNS_ANSWER",
            ObservationKind::SshServer => "SSH_SERVER",
            ObservationKind::SshServerHostkey => "SSH_SERVER_HOSTKEY",
            ObservationKind::SshClientHassh => "SSH_CLIENT_HASSH",
            ObservationKind::SshServerHassh => "SSH_SERVER_HASSH",
            ObservationKind::TcpServerBanner => "TCP_SERVER_BANNER",
            ObservationKind::MacAddress => "MAC_ADDRESS",
            ObservationKind::OpenPort => "OPEN_PORT",
            ObservationKind::Unknown => "UNKNOWN",
        }
    }

    /// A bare DNS answer says nothing about whether the host is up
    pub fn proves_liveness(&self) -> bool {
        !matches!(self, ObservationKind::DnsAnswer)
    }
}

/// Second-level key for SSL observations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SslSource {
    Cert,
    CaCert,
    /// Client ja3 digest (`ja3`)
    Ja3,
    /// Server ja3 digest tagged with the client digest (`ja3-<md5>`)
    Ja3For(String),
    Other,
}

impl SslSource {
    pub fn parse(source: &str) -> Self {
        match source {
            "cert" => SslSource::Cert,
            "cacert" => SslSource::CaCert,
            "ja3" => SslSource::Ja3,
            _ => match source.strip_prefix("ja3-") {
                Some(client) => SslSource::Ja3For(client.to_string()),
                None => SslSource::Other,
            },
        }
    }
}

/// One active-scan document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    #[serde(default)]
    pub addr: Option<Address>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub state_reason: Option<String>,
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub source: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub starttime: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub endtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub hostnames: Vec<Hostname>,
    #[serde(default)]
    pub addresses: Addresses,
    #[serde(default)]
    pub cpes: Vec<Cpe>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub schema_version: Option<u32>,
}

impl ScanRecord {
    /// Convert into the view shape; records without an address yield `None`
    pub fn into_view(self) -> Option<HostView> {
        let addr = self.addr?;
        Some(HostView {
            addr,
            state: self.state,
            state_reason: self.state_reason,
            source: self.source,
            starttime: self.starttime,
            endtime: self.endtime,
            ports: self.ports,
            hostnames: self.hostnames,
            addresses: self.addresses,
            cpes: self.cpes,
            categories: self.categories,
            schema_version: self.schema_version,
            ..HostView::default()
        })
    }
}

fn timestamp_from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

fn timestamp_from_str(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Accepts epoch seconds (integer or float) or a datetime string
pub(crate) fn deserialize_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(timestamp_from_epoch)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", n))),
        Some(Value::String(s)) => timestamp_from_str(&s)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("unparseable timestamp: {}", s))),
        Some(other) => Err(de::Error::custom(format!("unexpected timestamp: {}", other))),
    }
}

/// `source` is either a string or a list of strings in scan documents
fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) if s.is_empty() => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s]),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(de::Error::custom(format!("unexpected source entry: {}", other))),
            })
            .collect(),
        Some(other) => Err(de::Error::custom(format!("unexpected source: {}", other))),
    }
}
