//! Query predicate for passive observations

use crate::view_core::Observation;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub sensor: Option<String>,
    /// Allow-list of recontypes; `None` accepts all
    pub recontypes: Option<Vec<String>>,
}

impl RecordFilter {
    pub fn new(sensor: Option<String>, recontypes: Option<Vec<String>>) -> Self {
        Self { sensor, recontypes }
    }

    pub fn is_empty(&self) -> bool {
        self.sensor.is_none() && self.recontypes.is_none()
    }

    pub fn matches(&self, obs: &Observation) -> bool {
        if let Some(sensor) = &self.sensor {
            if obs.sensor.as_deref() != Some(sensor.as_str()) {
                return false;
            }
        }
        match &self.recontypes {
            Some(allowed) => allowed.iter().any(|r| r == &obs.recontype),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_observation(sensor: Option<&str>, recontype: &str) -> Observation {
        Observation {
            addr: Some("10.0.0.1".parse().unwrap()),
            recontype: recontype.to_string(),
            source: None,
            value: String::new(),
            infos: Default::default(),
            port: None,
            protocol: None,
            firstseen: None,
            lastseen: None,
            sensor: sensor.map(str::to_string),
            schema_version: Some(3),
        }
    }

    #[test]
    fn test_filter_matches() {
        let any = RecordFilter::default();
        assert!(any.is_empty());
        assert!(any.matches(&create_test_observation(None, "OPEN_PORT")));

        let filter = RecordFilter::new(
            Some("TAP0".to_string()),
            Some(vec!["SSH_SERVER".to_string(), "OPEN_PORT".to_string()]),
        );
        assert!(filter.matches(&create_test_observation(Some("TAP0"), "OPEN_PORT")));
        assert!(!filter.matches(&create_test_observation(Some("TAP1"), "OPEN_PORT")));
        assert!(!filter.matches(&create_test_observation(None, "OPEN_PORT")));
        assert!(!filter.matches(&create_test_observation(Some("TAP0"), "DNS_ANSWER")));
    }
}
