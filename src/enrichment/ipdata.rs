//! Address-info (geo / AS) enrichment over HTTP
//!
//! Endpoint: `GET <base>/ipdata/<addr>`, returning a JSON object with the
//! fields of `AddressInfo`. A 404 means the address is unknown.

use crate::view_core::{Address, HostView};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_name: Option<String>,
    /// `[latitude, longitude]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_code: Option<String>,
}

#[derive(Debug)]
pub enum LookupError {
    Http(reqwest::Error),
    Status(StatusCode),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        LookupError::Http(err)
    }
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupError::Http(e) => write!(f, "HTTP error: {}", e),
            LookupError::Status(s) => write!(f, "ipdata API error: {}", s),
        }
    }
}

impl std::error::Error for LookupError {}

#[async_trait]
pub trait AddressInfoLookup: Send + Sync {
    /// `Ok(None)` when the service knows nothing about the address
    async fn by_address(&self, addr: Address) -> Result<Option<AddressInfo>, LookupError>;
}

pub struct HttpIpData {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIpData {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, addr: Address) -> String {
        format!("{}/ipdata/{}", self.base_url, addr)
    }
}

#[async_trait]
impl AddressInfoLookup for HttpIpData {
    async fn by_address(&self, addr: Address) -> Result<Option<AddressInfo>, LookupError> {
        let response = self.client.get(self.url_for(addr)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        Ok(Some(response.json().await?))
    }
}

/// Copy the known address-info fields into `view.infos`
pub fn enrich_view(view: &mut HostView, info: &AddressInfo) {
    let Ok(Value::Object(fields)) = serde_json::to_value(info) else {
        return;
    };
    for (key, value) in fields {
        view.infos.insert(key, value);
    }
}

/// Look the view's address up and enrich it; failures leave the view as-is
pub async fn enrich(lookup: &dyn AddressInfoLookup, view: &mut HostView) -> bool {
    match lookup.by_address(view.addr).await {
        Ok(Some(info)) => {
            enrich_view(view, &info);
            true
        }
        Ok(None) => false,
        Err(e) => {
            log::warn!("⚠️  Address info lookup failed for {}: {}", view.addr, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticLookup {
        known: HashMap<Address, AddressInfo>,
    }

    #[async_trait]
    impl AddressInfoLookup for StaticLookup {
        async fn by_address(&self, addr: Address) -> Result<Option<AddressInfo>, LookupError> {
            Ok(self.known.get(&addr).cloned())
        }
    }

    fn create_test_info() -> AddressInfo {
        AddressInfo {
            country_code: Some("FR".to_string()),
            country_name: Some("France".to_string()),
            as_num: Some(3215),
            as_name: Some("Orange".to_string()),
            coordinates: Some(vec![48.8582, 2.3387]),
            ..AddressInfo::default()
        }
    }

    #[test]
    fn test_enrich_view_copies_present_fields() {
        let mut view = HostView::new("192.0.2.1".parse().unwrap());
        enrich_view(&mut view, &create_test_info());

        assert_eq!(view.infos["country_code"], "FR");
        assert_eq!(view.infos["as_num"], 3215);
        assert_eq!(view.infos["coordinates"][1], 2.3387);
        assert!(!view.infos.contains_key("city"));
    }

    #[tokio::test]
    async fn test_enrich_known_and_unknown() {
        let known_addr: Address = "192.0.2.1".parse().unwrap();
        let lookup = StaticLookup {
            known: HashMap::from([(known_addr, create_test_info())]),
        };

        let mut known = HostView::new(known_addr);
        assert!(enrich(&lookup, &mut known).await);
        assert_eq!(known.infos["as_name"], "Orange");

        let mut unknown = HostView::new("198.51.100.1".parse().unwrap());
        assert!(!enrich(&lookup, &mut unknown).await);
        assert!(unknown.infos.is_empty());
    }

    #[test]
    fn test_url_for() {
        let ipdata = HttpIpData::new("http://localhost:8080/cgi/").unwrap();
        assert_eq!(
            ipdata.url_for("2001:db8::1".parse().unwrap()),
            "http://localhost:8080/cgi/ipdata/2001:db8::1"
        );
    }

    #[test]
    fn test_parse_service_response() {
        let info: AddressInfo = serde_json::from_str(
            r#"{"country_code":"US","as_num":15169,"as_name":"GOOGLE","coordinates":[37.751,-97.822],"continent_code":"NA"}"#,
        )
        .unwrap();
        assert_eq!(info.as_num, Some(15169));
        assert_eq!(info.coordinates, Some(vec![37.751, -97.822]));
    }
}
