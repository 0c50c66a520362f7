//! Two-record host merge
//!
//! Every field rule below is order-independent on well-formed inputs, with
//! the exception of `infos` where the existing record wins on key clashes.

use super::cpe::merge_cpes;
use super::model::{
    Addresses, HostView, Hostname, Port, Script, HOST_SCRIPTS_PORT, STATE_OPEN, STATE_UP,
};
use std::collections::{BTreeMap, BTreeSet};

/// Folds two records about the same address into one
pub trait HostCombiner: Send + Sync {
    fn combine(&self, existing: HostView, incoming: HostView) -> HostView;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeHostDocs;

impl HostCombiner for MergeHostDocs {
    fn combine(&self, existing: HostView, incoming: HostView) -> HostView {
        debug_assert_eq!(existing.addr, incoming.addr);

        let (state, state_reason) = pick_state(
            (existing.state, existing.state_reason),
            (incoming.state, incoming.state_reason),
            STATE_UP,
        );

        let mut infos = existing.infos;
        for (key, value) in incoming.infos {
            infos.entry(key).or_insert(value);
        }

        let mut merged = HostView {
            addr: existing.addr,
            state,
            state_reason,
            source: sorted_union(existing.source, incoming.source),
            starttime: min_present(existing.starttime, incoming.starttime),
            endtime: existing.endtime.max(incoming.endtime),
            ports: merge_ports(existing.ports, incoming.ports),
            hostnames: merge_hostnames(existing.hostnames, incoming.hostnames),
            addresses: Addresses {
                mac: sorted_union(existing.addresses.mac, incoming.addresses.mac),
            },
            cpes: merge_cpes(existing.cpes, incoming.cpes),
            categories: sorted_union(existing.categories, incoming.categories),
            schema_version: existing.schema_version.max(incoming.schema_version),
            openports: Default::default(),
            infos,
        };
        merged.refresh_openports();
        merged
    }
}

fn sorted_union(left: Vec<String>, right: Vec<String>) -> Vec<String> {
    left.into_iter()
        .chain(right)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn min_present<T: Ord>(left: Option<T>, right: Option<T>) -> Option<T> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l.min(r)),
        (l, r) => l.or(r),
    }
}

/// Choose a `(state, reason)` pair: `preferred` state first, then any state
/// over none, then the lexicographically smaller state and reason.
fn pick_state(
    left: (Option<String>, Option<String>),
    right: (Option<String>, Option<String>),
    preferred: &str,
) -> (Option<String>, Option<String>) {
    let rank = |(state, reason): &(Option<String>, Option<String>)| {
        (
            state.as_deref() != Some(preferred),
            state.is_none(),
            state.clone(),
            reason.is_none(),
            reason.clone(),
        )
    };
    if rank(&right) < rank(&left) {
        right
    } else {
        left
    }
}

type PortKey = (bool, Option<String>, i32);

fn port_key(port: &Port) -> PortKey {
    (port.port != HOST_SCRIPTS_PORT, port.protocol.clone(), port.port)
}

fn merge_ports(left: Vec<Port>, right: Vec<Port>) -> Vec<Port> {
    let mut by_key: BTreeMap<PortKey, Port> = BTreeMap::new();
    for port in left.into_iter().chain(right) {
        let key = port_key(&port);
        let merged = match by_key.remove(&key) {
            Some(existing) => merge_port(existing, port),
            None => port,
        };
        by_key.insert(key, merged);
    }
    by_key.into_values().collect()
}

fn merge_port(existing: Port, incoming: Port) -> Port {
    let (state_state, state_reason) = pick_state(
        (existing.state_state, existing.state_reason),
        (incoming.state_state, incoming.state_reason),
        STATE_OPEN,
    );
    Port {
        port: existing.port,
        protocol: existing.protocol,
        state_state,
        state_reason,
        service_name: existing.service_name.max(incoming.service_name),
        service_product: existing.service_product.max(incoming.service_product),
        service_version: existing.service_version.max(incoming.service_version),
        service_extrainfo: existing.service_extrainfo.max(incoming.service_extrainfo),
        service_tunnel: existing.service_tunnel.max(incoming.service_tunnel),
        scripts: merge_scripts(existing.scripts, incoming.scripts),
    }
}

fn script_rank(script: &Script) -> (usize, String, String) {
    (
        script.output.len(),
        script.output.clone(),
        serde_json::to_string(script).unwrap_or_default(),
    )
}

/// Scripts are unique by id; on clashes the one with the larger output stays
fn merge_scripts(left: Vec<Script>, right: Vec<Script>) -> Vec<Script> {
    let mut by_id: BTreeMap<String, Script> = BTreeMap::new();
    for script in left.into_iter().chain(right) {
        match by_id.get(&script.id) {
            Some(current) if script_rank(current) >= script_rank(&script) => {}
            _ => {
                by_id.insert(script.id.clone(), script);
            }
        }
    }
    by_id.into_values().collect()
}

fn merge_hostnames(left: Vec<Hostname>, right: Vec<Hostname>) -> Vec<Hostname> {
    let mut by_key: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
    for hostname in left.into_iter().chain(right) {
        by_key
            .entry((hostname.name, hostname.kind))
            .or_default()
            .extend(hostname.domains);
    }
    by_key
        .into_iter()
        .map(|((name, kind), domains)| Hostname {
            name,
            kind,
            domains: domains.into_iter().collect(),
        })
        .collect()
}
