//! Multi-source streaming merge
//!
//! Each lane buffers one fragment from its stream. Every round takes the
//! numerically smallest buffered address (the frontier), folds every lane
//! sitting on it, advances those lanes and emits the result. Lanes whose
//! stream is exhausted are dropped with `retain`.

use super::address::Address;
use super::codec::{self, BinaryCodec};
use super::merge::HostCombiner;
use super::model::HostView;
use std::sync::Arc;

pub type FragmentStream = Box<dyn Iterator<Item = HostView> + Send>;

struct Lane {
    stream: FragmentStream,
    head: Option<HostView>,
    index: usize,
}

impl Lane {
    /// Pull the next fragment, returning a regression if the stream went backwards
    ///
    /// A repeat of the previous address is not a regression; the scheduler
    /// folds it into the same round.
    fn advance(&mut self, previous: Option<Address>) -> Option<(Address, Address)> {
        self.head = self.stream.next();
        match (previous, self.head.as_ref()) {
            (Some(prev), Some(next)) if next.addr < prev => Some((prev, next.addr)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub emitted: u64,
    pub combined: u64,
    pub order_violations: u64,
}

pub struct MergeScheduler {
    lanes: Vec<Lane>,
    combiner: Arc<dyn HostCombiner>,
    codec: Arc<dyn BinaryCodec>,
    primed: bool,
    stats: MergeStats,
}

impl MergeScheduler {
    pub fn new(
        streams: Vec<FragmentStream>,
        combiner: Arc<dyn HostCombiner>,
        codec: Arc<dyn BinaryCodec>,
    ) -> Self {
        let lanes = streams
            .into_iter()
            .enumerate()
            .map(|(index, stream)| Lane {
                stream,
                head: None,
                index,
            })
            .collect();
        Self {
            lanes,
            combiner,
            codec,
            primed: false,
            stats: MergeStats::default(),
        }
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Streams not yet known to be exhausted
    pub fn live_streams(&self) -> usize {
        self.lanes.len()
    }

    fn prime(&mut self) {
        for lane in self.lanes.iter_mut() {
            lane.advance(None);
        }
        self.lanes.retain(|lane| lane.head.is_some());
        self.primed = true;
        log::debug!("Merge primed with {} live streams", self.lanes.len());
    }

    fn frontier(&self) -> Option<Address> {
        self.lanes
            .iter()
            .filter_map(|lane| lane.head.as_ref().map(|head| head.addr))
            .min()
    }
}

impl Iterator for MergeScheduler {
    type Item = HostView;

    fn next(&mut self) -> Option<HostView> {
        if !self.primed {
            self.prime();
        }
        let frontier = self.frontier()?;

        let mut accumulator: Option<HostView> = None;
        // Lanes may repeat the frontier; fold until none is left on it
        while self
            .lanes
            .iter()
            .any(|lane| lane.head.as_ref().map(|head| head.addr) == Some(frontier))
        {
            for lane in self.lanes.iter_mut() {
                if lane.head.as_ref().map(|head| head.addr) != Some(frontier) {
                    continue;
                }
                if let Some(fragment) = lane.head.take() {
                    accumulator = Some(match accumulator {
                        Some(current) => {
                            self.stats.combined += 1;
                            self.combiner.combine(current, fragment)
                        }
                        None => fragment,
                    });
                }
                if let Some((previous, next)) = lane.advance(Some(frontier)) {
                    self.stats.order_violations += 1;
                    log::warn!(
                        "⚠️  Stream {} regressed: {} after {}",
                        lane.index,
                        next,
                        previous
                    );
                }
            }
        }
        self.lanes.retain(|lane| lane.head.is_some());

        let mut view = accumulator?;
        codec::to_storage(&mut view, self.codec.as_ref());
        self.stats.emitted += 1;
        Some(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view_core::codec::{Base64Codec, BinaryField};
    use crate::view_core::merge::MergeHostDocs;
    use crate::view_core::model::{Port, Script};

    fn create_test_fragment(addr: &str, ports: &[i32]) -> HostView {
        let mut view = HostView::new(addr.parse().unwrap());
        view.ports = ports.iter().map(|p| Port::passive_open(*p, "tcp")).collect();
        view.refresh_openports();
        view
    }

    fn stream(fragments: Vec<HostView>) -> FragmentStream {
        Box::new(fragments.into_iter())
    }

    fn scheduler(streams: Vec<FragmentStream>) -> MergeScheduler {
        MergeScheduler::new(streams, Arc::new(MergeHostDocs), Arc::new(Base64Codec))
    }

    fn addrs(views: &[HostView]) -> Vec<String> {
        views.iter().map(|v| v.addr.to_string()).collect()
    }

    #[test]
    fn test_three_sources_one_host_any_order() {
        let inputs = [22, 80, 443];
        let orders = [[0, 1, 2], [2, 0, 1], [1, 2, 0]];
        for order in orders {
            let streams = order
                .iter()
                .map(|i| stream(vec![create_test_fragment("10.0.0.1", &[inputs[*i]])]))
                .collect();
            let views: Vec<HostView> = scheduler(streams).collect();

            assert_eq!(views.len(), 1);
            let ports: Vec<i32> = views[0].ports.iter().map(|p| p.port).collect();
            assert_eq!(ports, vec![22, 80, 443]);
            assert_eq!(views[0].openports.count, 3);
        }
    }

    #[test]
    fn test_disjoint_sources_interleave() {
        let views: Vec<HostView> = scheduler(vec![
            stream(vec![create_test_fragment("2.2.2.2", &[80])]),
            stream(vec![create_test_fragment("1.1.1.1", &[22])]),
        ])
        .collect();
        assert_eq!(addrs(&views), vec!["1.1.1.1", "2.2.2.2"]);
    }

    #[test]
    fn test_every_address_once_in_numeric_order() {
        let mut merge = scheduler(vec![
            stream(vec![
                create_test_fragment("9.0.0.1", &[22]),
                create_test_fragment("10.0.0.1", &[22]),
                create_test_fragment("10.0.0.3", &[22]),
            ]),
            stream(vec![
                create_test_fragment("10.0.0.1", &[80]),
                create_test_fragment("10.0.0.2", &[80]),
            ]),
            stream(Vec::new()),
            stream(vec![create_test_fragment("::ffff:10.0.0.3", &[443])]),
        ]);
        let views: Vec<HostView> = merge.by_ref().collect();

        assert_eq!(addrs(&views), vec!["9.0.0.1", "10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert_eq!(views[1].ports.len(), 2);
        assert_eq!(views[3].ports.len(), 2);
        assert_eq!(merge.stats().emitted, 4);
        assert_eq!(merge.stats().combined, 2);
        assert_eq!(merge.stats().order_violations, 0);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(scheduler(Vec::new()).count(), 0);
        assert_eq!(scheduler(vec![stream(Vec::new()), stream(Vec::new())]).count(), 0);
    }

    #[test]
    fn test_regressing_stream_is_counted() {
        let mut merge = scheduler(vec![stream(vec![
            create_test_fragment("10.0.0.2", &[22]),
            create_test_fragment("10.0.0.1", &[22]),
        ])]);
        let views: Vec<HostView> = merge.by_ref().collect();
        assert_eq!(views.len(), 2);
        assert_eq!(merge.stats().order_violations, 1);
    }

    #[test]
    fn test_repeated_address_in_one_lane_is_folded() {
        let mut merge = scheduler(vec![
            stream(vec![
                create_test_fragment("10.0.0.1", &[22]),
                create_test_fragment("10.0.0.1", &[80]),
                create_test_fragment("10.0.0.2", &[22]),
            ]),
            stream(vec![create_test_fragment("10.0.0.1", &[443])]),
        ]);
        let views: Vec<HostView> = merge.by_ref().collect();

        assert_eq!(addrs(&views), vec!["10.0.0.1", "10.0.0.2"]);
        let ports: Vec<i32> = views[0].ports.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![22, 80, 443]);
        assert_eq!(merge.stats().combined, 2);
        assert_eq!(merge.stats().order_violations, 0);
    }

    #[test]
    fn test_output_is_storage_encoded() {
        let mut fragment = create_test_fragment("10.0.0.1", &[80]);
        let mut script = Script::new("http-screenshot", "saved");
        script.screendata = Some(BinaryField::Bytes(b"PNG".to_vec()));
        fragment.ports[0].scripts.push(script);

        let views: Vec<HostView> = scheduler(vec![stream(vec![fragment])]).collect();
        assert_eq!(
            views[0].ports[0].scripts[0].screendata,
            Some(BinaryField::Encoded("UE5H".to_string()))
        );
    }
}
