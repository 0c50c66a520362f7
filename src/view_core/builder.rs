//! Assembly of groupers and the merge scheduler

use super::codec::{Base64Codec, BinaryCodec};
use super::extractor::ExtractorRegistry;
use super::grouper::SourceGrouper;
use super::merge::{HostCombiner, MergeHostDocs};
use super::model::HostView;
use super::observation::{Observation, ScanRecord};
use super::scheduler::{FragmentStream, MergeScheduler};
use std::sync::Arc;

/// Collects record streams and produces one lazy merged view stream
///
/// ```ignore
/// let views = ViewBuilder::new(Some("lab".to_string()))
///     .add_passive(observations)
///     .add_active(scans)
///     .build();
/// for view in views { /* sorted, one per address */ }
/// ```
pub struct ViewBuilder {
    category: Option<String>,
    registry: ExtractorRegistry,
    combiner: Arc<dyn HostCombiner>,
    codec: Arc<dyn BinaryCodec>,
    streams: Vec<FragmentStream>,
}

impl ViewBuilder {
    pub fn new(category: Option<String>) -> Self {
        Self {
            category,
            registry: ExtractorRegistry::default(),
            combiner: Arc::new(MergeHostDocs),
            codec: Arc::new(Base64Codec),
            streams: Vec::new(),
        }
    }

    /// Only affects passive streams added afterwards
    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Only affects streams added afterwards (and the scheduler)
    pub fn with_combiner(mut self, combiner: Arc<dyn HostCombiner>) -> Self {
        self.combiner = combiner;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn BinaryCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn add_passive<I>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = Observation>,
        I::IntoIter: Send + 'static,
    {
        let grouper = SourceGrouper::passive(
            records.into_iter(),
            self.registry.clone(),
            self.combiner.clone(),
            self.category.clone(),
        );
        self.streams.push(Box::new(grouper));
        self
    }

    pub fn add_active<I>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = ScanRecord>,
        I::IntoIter: Send + 'static,
    {
        let grouper = SourceGrouper::active(
            records.into_iter(),
            self.codec.clone(),
            self.combiner.clone(),
            self.category.clone(),
        );
        self.streams.push(Box::new(grouper));
        self
    }

    /// Add an already grouped, address-sorted fragment stream
    pub fn add_fragments<I>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = HostView>,
        I::IntoIter: Send + 'static,
    {
        self.streams.push(Box::new(fragments.into_iter()));
        self
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn build(self) -> MergeScheduler {
        log::info!("🔀 Merging {} source streams", self.streams.len());
        MergeScheduler::new(self.streams, self.combiner, self.codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view_core::codec::{BinaryField, HexCodec};

    fn create_test_observation(addr: &str, recontype: &str, source: &str, port: i32) -> Observation {
        serde_json::from_value(serde_json::json!({
            "addr": addr,
            "recontype": recontype,
            "source": source,
            "value": "",
            "port": port,
            "firstseen": 1_600_000_000,
            "lastseen": 1_600_000_100,
            "sensor": "TAP0",
            "schema_version": 3
        }))
        .unwrap()
    }

    fn create_test_scan(line: &str) -> ScanRecord {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn test_passive_and_active_merge() {
        let passive = vec![
            create_test_observation("10.0.0.1", "OPEN_PORT", "TCP", 22),
            create_test_observation("10.0.0.1", "OPEN_PORT", "UDP", 53),
            create_test_observation("10.0.0.9", "OPEN_PORT", "TCP", 80),
        ];
        let active = vec![
            create_test_scan(r#"{"addr":"10.0.0.1","schema_version":18,"source":"scan","state":"up","ports":[{"port":443,"protocol":"tcp","state_state":"open","scripts":[{"id":"http-screenshot","output":"ok","screendata":"5047"}]}]}"#),
            create_test_scan(r#"{"addr":"10.0.0.5","schema_version":18,"ports":[]}"#),
        ];

        let views: Vec<HostView> = ViewBuilder::new(Some("lab".to_string()))
            .with_registry(ExtractorRegistry::without_fingerprints())
            .with_codec(Arc::new(HexCodec))
            .add_passive(passive)
            .add_active(active)
            .build()
            .collect();

        let addrs: Vec<String> = views.iter().map(|v| v.addr.to_string()).collect();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.5", "10.0.0.9"]);

        let host = &views[0];
        assert_eq!(host.source, vec!["TAP0", "scan"]);
        assert_eq!(host.categories, vec!["lab"]);
        assert_eq!(host.openports.count, 3);
        assert_eq!(host.schema_version, Some(18));
        let screenshot = host
            .ports
            .iter()
            .find(|p| p.port == 443)
            .and_then(|p| p.scripts.first())
            .and_then(|s| s.screendata.clone());
        assert_eq!(screenshot, Some(BinaryField::Encoded("5047".to_string())));
    }

    #[test]
    fn test_prebuilt_fragments() {
        let fragment = HostView::new("192.0.2.1".parse().unwrap());
        let builder = ViewBuilder::new(None).add_fragments(vec![fragment.clone()]);
        assert_eq!(builder.stream_count(), 1);
        assert_eq!(builder.build().collect::<Vec<_>>(), vec![fragment]);
    }
}
