//! Per-source folding of adjacent same-address records
//!
//! A grouper wraps one address-sorted record stream. An adapter turns each
//! record into a fragment (or drops it); the grouper folds runs of equal
//! addresses with the combiner and yields one fragment per address.

use super::address::Address;
use super::codec::{self, BinaryCodec};
use super::extractor::ExtractorRegistry;
use super::merge::HostCombiner;
use super::model::{HostView, REASON_PASSIVE, STATE_UP};
use super::observation::{Observation, ScanRecord};
use super::schema::{RecordKind, SchemaGate, ACTIVE_SCHEMA_VERSION};
use std::sync::Arc;

/// Turns one raw record into a fragment, or drops it
pub trait FragmentSource {
    type Record;

    fn to_fragment(&mut self, record: Self::Record) -> Option<HostView>;

    /// Records rejected by the schema gate so far
    fn rejected(&self) -> u64;
}

pub struct PassiveAdapter {
    registry: ExtractorRegistry,
    gate: SchemaGate,
    category: Option<String>,
}

impl PassiveAdapter {
    pub fn new(registry: ExtractorRegistry, category: Option<String>) -> Self {
        Self {
            registry,
            gate: SchemaGate::new(RecordKind::Passive),
            category,
        }
    }
}

impl FragmentSource for PassiveAdapter {
    type Record = Observation;

    fn to_fragment(&mut self, record: Observation) -> Option<HostView> {
        if !self.gate.admit(record.schema_version, &record) {
            return None;
        }
        if record.addr.is_none() {
            log::debug!("Dropping passive {} record without address", record.recontype);
            return None;
        }

        let mut view = self.registry.extract(&record);
        if record.kind().proves_liveness() {
            view.state = Some(STATE_UP.to_string());
        }
        view.state_reason = Some(REASON_PASSIVE.to_string());
        if let Some(sensor) = record.sensor.filter(|s| !s.is_empty()) {
            view.source = vec![sensor];
        }
        view.starttime = record.firstseen;
        view.endtime = record.lastseen;
        view.schema_version = Some(ACTIVE_SCHEMA_VERSION);
        if let Some(category) = &self.category {
            view.categories.push(category.clone());
        }
        Some(view)
    }

    fn rejected(&self) -> u64 {
        self.gate.rejected()
    }
}

pub struct ActiveAdapter {
    gate: SchemaGate,
    codec: Arc<dyn BinaryCodec>,
    category: Option<String>,
}

impl ActiveAdapter {
    pub fn new(codec: Arc<dyn BinaryCodec>, category: Option<String>) -> Self {
        Self {
            gate: SchemaGate::new(RecordKind::Active),
            codec,
            category,
        }
    }
}

impl FragmentSource for ActiveAdapter {
    type Record = ScanRecord;

    fn to_fragment(&mut self, record: ScanRecord) -> Option<HostView> {
        if !self.gate.admit(record.schema_version, &record) {
            return None;
        }
        let Some(mut view) = record.into_view() else {
            log::debug!("Dropping scan record without address");
            return None;
        };
        codec::to_canonical(&mut view, self.codec.as_ref());
        if let Some(category) = &self.category {
            view.categories.push(category.clone());
        }
        Some(view)
    }

    fn rejected(&self) -> u64 {
        self.gate.rejected()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub records: u64,
    pub emitted: u64,
    pub order_violations: u64,
}

/// Iterator of per-address fragments over one sorted record stream
pub struct SourceGrouper<I, A>
where
    I: Iterator<Item = A::Record>,
    A: FragmentSource,
{
    records: I,
    adapter: A,
    combiner: Arc<dyn HostCombiner>,
    current: Option<HostView>,
    last_addr: Option<Address>,
    stats: GroupStats,
    label: String,
}

impl<I> SourceGrouper<I, PassiveAdapter>
where
    I: Iterator<Item = Observation>,
{
    pub fn passive(
        records: I,
        registry: ExtractorRegistry,
        combiner: Arc<dyn HostCombiner>,
        category: Option<String>,
    ) -> Self {
        Self::new(records, PassiveAdapter::new(registry, category), combiner, "passive")
    }
}

impl<I> SourceGrouper<I, ActiveAdapter>
where
    I: Iterator<Item = ScanRecord>,
{
    pub fn active(
        records: I,
        codec: Arc<dyn BinaryCodec>,
        combiner: Arc<dyn HostCombiner>,
        category: Option<String>,
    ) -> Self {
        Self::new(records, ActiveAdapter::new(codec, category), combiner, "active")
    }
}

impl<I, A> SourceGrouper<I, A>
where
    I: Iterator<Item = A::Record>,
    A: FragmentSource,
{
    pub fn new(records: I, adapter: A, combiner: Arc<dyn HostCombiner>, label: &str) -> Self {
        Self {
            records,
            adapter,
            combiner,
            current: None,
            last_addr: None,
            stats: GroupStats::default(),
            label: label.to_string(),
        }
    }

    pub fn stats(&self) -> &GroupStats {
        &self.stats
    }

    pub fn rejected(&self) -> u64 {
        self.adapter.rejected()
    }

    fn check_order(&mut self, addr: Address) {
        if let Some(last) = self.last_addr {
            if addr < last {
                self.stats.order_violations += 1;
                log::warn!(
                    "⚠️  {} source out of order: {} after {}",
                    self.label,
                    addr,
                    last
                );
            }
        }
        self.last_addr = Some(addr);
    }

    fn finish(&mut self, mut view: HostView) -> HostView {
        view.refresh_openports();
        self.stats.emitted += 1;
        view
    }
}

impl<I, A> Iterator for SourceGrouper<I, A>
where
    I: Iterator<Item = A::Record>,
    A: FragmentSource,
{
    type Item = HostView;

    fn next(&mut self) -> Option<HostView> {
        while let Some(record) = self.records.next() {
            self.stats.records += 1;
            let Some(fragment) = self.adapter.to_fragment(record) else {
                continue;
            };
            self.check_order(fragment.addr);

            match self.current.take() {
                Some(current) if current.addr == fragment.addr => {
                    self.current = Some(self.combiner.combine(current, fragment));
                }
                Some(current) => {
                    self.current = Some(fragment);
                    return Some(self.finish(current));
                }
                None => self.current = Some(fragment),
            }
        }

        let last = self.current.take()?;
        Some(self.finish(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view_core::codec::Base64Codec;
    use crate::view_core::merge::MergeHostDocs;
    use crate::view_core::schema::PASSIVE_SCHEMA_VERSION;
    use chrono::DateTime;
    use serde_json::Map;

    fn create_test_observation(addr: &str, port: i32) -> Observation {
        Observation {
            addr: Some(addr.parse().unwrap()),
            recontype: "OPEN_PORT".to_string(),
            source: Some("TCP".to_string()),
            value: String::new(),
            infos: Map::new(),
            port: Some(port),
            protocol: None,
            firstseen: DateTime::from_timestamp(1_600_000_000 + port as i64, 0),
            lastseen: DateTime::from_timestamp(1_600_000_100 + port as i64, 0),
            sensor: Some("TAP0".to_string()),
            schema_version: Some(PASSIVE_SCHEMA_VERSION),
        }
    }

    fn passive_grouper(
        records: Vec<Observation>,
    ) -> SourceGrouper<std::vec::IntoIter<Observation>, PassiveAdapter> {
        SourceGrouper::passive(
            records.into_iter(),
            ExtractorRegistry::without_fingerprints(),
            Arc::new(MergeHostDocs),
            Some("lab".to_string()),
        )
    }

    #[test]
    fn test_adjacent_runs_are_folded() {
        let records = vec![
            create_test_observation("10.0.0.1", 22),
            create_test_observation("10.0.0.1", 80),
            create_test_observation("10.0.0.2", 22),
            create_test_observation("10.0.0.2", 25),
            create_test_observation("10.0.0.2", 443),
            create_test_observation("10.0.0.3", 8080),
        ];
        let mut grouper = passive_grouper(records);
        let views: Vec<HostView> = grouper.by_ref().collect();

        assert_eq!(views.len(), 3);
        assert_eq!(views[0].addr.to_string(), "10.0.0.1");
        assert_eq!(views[0].openports.count, 2);
        assert_eq!(views[1].ports.len(), 3);
        assert_eq!(views[1].starttime, DateTime::from_timestamp(1_600_000_022, 0));
        assert_eq!(views[1].endtime, DateTime::from_timestamp(1_600_000_543, 0));
        assert_eq!(views[2].categories, vec!["lab"]);
        assert_eq!(views[2].state.as_deref(), Some(STATE_UP));
        assert_eq!(views[2].source, vec!["TAP0"]);
        assert_eq!(views[2].schema_version, Some(ACTIVE_SCHEMA_VERSION));
        assert_eq!(grouper.stats().emitted, 3);
        assert_eq!(grouper.stats().order_violations, 0);
    }

    #[test]
    fn test_out_of_order_is_counted_not_fixed() {
        let records = vec![
            create_test_observation("10.0.0.2", 22),
            create_test_observation("10.0.0.1", 22),
            create_test_observation("10.0.0.2", 80),
        ];
        let mut grouper = passive_grouper(records);
        let addrs: Vec<String> = grouper.by_ref().map(|v| v.addr.to_string()).collect();

        assert_eq!(addrs, vec!["10.0.0.2", "10.0.0.1", "10.0.0.2"]);
        assert_eq!(grouper.stats().order_violations, 1);
    }

    #[test]
    fn test_schema_mismatch_contributes_nothing() {
        let mut stale = create_test_observation("10.0.0.1", 8443);
        stale.schema_version = Some(2);
        let records = vec![create_test_observation("10.0.0.1", 22), stale];
        let mut grouper = passive_grouper(records);
        let views: Vec<HostView> = grouper.by_ref().collect();

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].ports.len(), 1);
        assert_eq!(grouper.rejected(), 1);
    }

    #[test]
    fn test_dns_answer_does_not_mark_up() {
        let mut dns = create_test_observation("10.0.0.1", 0);
        dns.recontype = "DNS_ANSWER".to_string();
        dns.source = Some("A-10.0.0.53-53".to_string());
        dns.value = "host.example.org".to_string();
        dns.infos
            .insert("domain".to_string(), serde_json::json!(["example.org"]));
        let views: Vec<HostView> = passive_grouper(vec![dns]).collect();

        assert!(views[0].state.is_none());
        assert_eq!(views[0].state_reason.as_deref(), Some(REASON_PASSIVE));
        assert_eq!(views[0].hostnames[0].name, "host.example.org");
    }

    #[test]
    fn test_active_grouper_decodes_and_tags() {
        let records: Vec<ScanRecord> = [
            r#"{"addr":"10.0.0.1","schema_version":18,"source":"scan-a","ports":[{"port":22,"protocol":"tcp","state_state":"open","scripts":[{"id":"banner","output":"SSH","masscan":{"raw":"U1NI"}}]}]}"#,
            r#"{"schema_version":18,"ports":[]}"#,
            r#"{"addr":"10.0.0.1","schema_version":17,"ports":[{"port":23,"protocol":"tcp","state_state":"open"}]}"#,
            r#"{"addr":"10.0.0.1","schema_version":18,"source":["scan-b"],"ports":[{"port":80,"protocol":"tcp","state_state":"open"}]}"#,
        ]
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

        let mut grouper = SourceGrouper::active(
            records.into_iter(),
            Arc::new(Base64Codec),
            Arc::new(MergeHostDocs),
            Some("lab".to_string()),
        );
        let views: Vec<HostView> = grouper.by_ref().collect();

        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.source, vec!["scan-a", "scan-b"]);
        assert_eq!(view.categories, vec!["lab"]);
        assert_eq!(view.openports.count, 2);
        let raw = view.ports[0].scripts[0].masscan.as_ref().unwrap().raw.as_ref().unwrap();
        assert_eq!(raw.as_bytes(), Some(&b"SSH"[..]));
        assert_eq!(grouper.rejected(), 1);
        assert_eq!(grouper.stats().records, 4);
    }
}
