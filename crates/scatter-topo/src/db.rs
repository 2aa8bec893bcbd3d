//! The node database — indexed view of every node this process knows about.
//!
//! One `NodeDb` instance holds the connected graph, another holds the
//! discovered-but-unconnected ("found") set. Both indices live behind a
//! single lock so the address map and the name map can never disagree.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use scatter_core::wire::{AdNameEntry, BusAddress, FoundNodeEntry, NodeStateEntry};

use crate::node::NodeInfo;

/// Upper bound on connect-chain hops; anything longer is a corrupt graph.
const MAX_CONNECT_HOPS: usize = 16;

struct DbInner {
    nodes: BTreeMap<BusAddress, NodeInfo>,
    by_name: HashMap<String, BusAddress>,
}

/// Cheaply cloneable handle; all clones share the same underlying database.
#[derive(Clone)]
pub struct NodeDb {
    inner: Arc<Mutex<DbInner>>,
}

impl Default for NodeDb {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDb {
    pub fn new() -> Self {
        NodeDb {
            inner: Arc::new(Mutex::new(DbInner {
                nodes: BTreeMap::new(),
                by_name: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DbInner> {
        // A poisoned lock means a panic mid-mutation; the indices may be
        // inconsistent but read access is still better than a cascade.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a node. An existing entry at the same address is fully
    /// replaced, across both indices, not merged.
    pub fn add_node(&self, node: NodeInfo) {
        let mut inner = self.lock();
        inner.remove_at(&node.address);
        if !node.unique_name.is_empty() {
            inner.by_name.insert(node.unique_name.clone(), node.address);
        }
        inner.nodes.insert(node.address, node);
    }

    /// Remove the node at `address`, returning it if present.
    pub fn remove_node(&self, address: &BusAddress) -> Option<NodeInfo> {
        self.lock().remove_at(address)
    }

    pub fn find_node(&self, address: &BusAddress) -> Option<NodeInfo> {
        self.lock().nodes.get(address).cloned()
    }

    pub fn find_node_by_name(&self, unique_name: &str) -> Option<NodeInfo> {
        let inner = self.lock();
        let address = inner.by_name.get(unique_name)?;
        inner.nodes.get(address).cloned()
    }

    pub fn contains(&self, address: &BusAddress) -> bool {
        self.lock().nodes.contains_key(address)
    }

    pub fn size(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.nodes.clear();
        inner.by_name.clear();
    }

    pub fn snapshot(&self) -> Vec<NodeInfo> {
        self.lock().nodes.values().cloned().collect()
    }

    /// Resolve the address a physical connection must be made to in order
    /// to reach `address`: the end of its `connect_via` chain.
    pub fn connect_address(&self, address: &BusAddress) -> Option<BusAddress> {
        let inner = self.lock();
        let mut current = *address;
        for _ in 0..MAX_CONNECT_HOPS {
            let node = inner.nodes.get(&current)?;
            match node.connect_via {
                Some(next) if next != current => current = next,
                _ => return Some(node.address),
            }
        }
        tracing::warn!(address = %address, "connect chain exceeds hop limit");
        None
    }

    /// Next direct minion in address order, strictly after `start` and
    /// wrapping around, skipping `skip`. Returns `start`'s own node last if
    /// it is itself a direct minion and nothing else qualifies.
    pub fn find_direct_minion(
        &self,
        start: Option<&BusAddress>,
        skip: Option<&BusAddress>,
    ) -> Option<NodeInfo> {
        let inner = self.lock();
        let addresses: Vec<BusAddress> = inner.nodes.keys().copied().collect();
        if addresses.is_empty() {
            return None;
        }
        let begin = match start {
            Some(s) => addresses.iter().position(|a| a == s).map(|i| i + 1).unwrap_or(0),
            None => 0,
        };
        for offset in 0..addresses.len() {
            let address = &addresses[(begin + offset) % addresses.len()];
            if Some(address) == skip {
                continue;
            }
            if let Some(node) = inner.nodes.get(address) {
                if node.direct_minion {
                    return Some(node.clone());
                }
            }
        }
        None
    }

    pub fn add_advertise_name(&self, address: &BusAddress, name: &str) -> bool {
        let mut inner = self.lock();
        match inner.nodes.get_mut(address) {
            Some(node) => node.advertise_names.insert(name.to_string()),
            None => false,
        }
    }

    pub fn remove_advertise_name(&self, address: &BusAddress, name: &str) -> bool {
        let mut inner = self.lock();
        match inner.nodes.get_mut(address) {
            Some(node) => node.advertise_names.remove(name),
            None => false,
        }
    }

    pub fn add_find_name(&self, address: &BusAddress, name: &str) -> bool {
        let mut inner = self.lock();
        match inner.nodes.get_mut(address) {
            Some(node) => node.find_names.insert(name.to_string()),
            None => false,
        }
    }

    pub fn remove_find_name(&self, address: &BusAddress, name: &str) -> bool {
        let mut inner = self.lock();
        match inner.nodes.get_mut(address) {
            Some(node) => node.find_names.remove(name),
            None => false,
        }
    }

    /// Per-address advertise-name difference against `other`.
    ///
    /// `added` holds what `other` has that we lack; `removed` holds what we
    /// have that `other` lacks. A node present on both sides contributes a
    /// partial copy carrying only the differing names, so consumers never
    /// re-announce unchanged ones. A node present on one side only goes in
    /// whole.
    pub fn diff(&self, other: &NodeDb) -> (Vec<NodeInfo>, Vec<NodeInfo>) {
        let theirs = other.snapshot();
        let inner = self.lock();

        let mut added = Vec::new();
        let mut removed = Vec::new();

        for their_node in &theirs {
            match inner.nodes.get(&their_node.address) {
                None => added.push(their_node.clone()),
                Some(our_node) => {
                    let mut partial = their_node.clone();
                    partial.advertise_names = their_node
                        .advertise_names
                        .difference(&our_node.advertise_names)
                        .cloned()
                        .collect();
                    if !partial.advertise_names.is_empty() {
                        added.push(partial);
                    }
                }
            }
        }

        for our_node in inner.nodes.values() {
            match theirs.iter().find(|n| n.address == our_node.address) {
                None => removed.push(our_node.clone()),
                Some(their_node) => {
                    let mut partial = our_node.clone();
                    partial.advertise_names = our_node
                        .advertise_names
                        .difference(&their_node.advertise_names)
                        .cloned()
                        .collect();
                    if !partial.advertise_names.is_empty() {
                        removed.push(partial);
                    }
                }
            }
        }

        (added, removed)
    }

    /// Apply a diff produced by [`NodeDb::diff`]: strip the removed names,
    /// optionally dropping nodes left with no advertise names, then merge
    /// in the added ones.
    pub fn update_db(&self, added: &[NodeInfo], removed: &[NodeInfo], remove_empty_nodes: bool) {
        let mut inner = self.lock();

        for partial in removed {
            let empty = match inner.nodes.get_mut(&partial.address) {
                Some(node) => {
                    for name in &partial.advertise_names {
                        node.advertise_names.remove(name);
                    }
                    node.advertise_names.is_empty()
                }
                None => continue,
            };
            if remove_empty_nodes && empty {
                inner.remove_at(&partial.address);
            }
        }

        for partial in added {
            match inner.nodes.get_mut(&partial.address) {
                Some(node) => {
                    for name in &partial.advertise_names {
                        node.advertise_names.insert(name.clone());
                    }
                    if partial.uuid_rev != scatter_core::wire::INVALID_UUID_REV {
                        node.uuid_rev = partial.uuid_rev;
                    }
                    if partial.connect_via.is_some() {
                        node.connect_via = partial.connect_via;
                    }
                }
                None => {
                    let node = partial.clone();
                    if !node.unique_name.is_empty() {
                        inner.by_name.insert(node.unique_name.clone(), node.address);
                    }
                    inner.nodes.insert(node.address, node);
                }
            }
        }
    }

    /// The full-state snapshot carried in a state-exchange message.
    pub fn node_state_entries(&self) -> Vec<NodeStateEntry> {
        self.lock().nodes.values().map(|n| n.state_entry()).collect()
    }

    /// Found-node snapshot, grouped by resolved connect address.
    pub fn found_node_entries(&self) -> Vec<FoundNodeEntry> {
        let nodes = self.snapshot();
        let mut groups: BTreeMap<BusAddress, FoundNodeEntry> = BTreeMap::new();
        for node in nodes {
            let connect = self.connect_address(&node.address).unwrap_or(node.address);
            let entry = groups.entry(connect).or_insert_with(|| FoundNodeEntry {
                connect_address: connect,
                uuid_rev: node.uuid_rev,
                ad_names: Vec::new(),
            });
            if node.uuid_rev != scatter_core::wire::INVALID_UUID_REV {
                entry.uuid_rev = node.uuid_rev;
            }
            entry.ad_names.push(AdNameEntry {
                guid: node.guid.clone(),
                address: node.address,
                names: node.advertise_names.iter().cloned().collect(),
            });
        }
        groups.into_values().collect()
    }
}

impl DbInner {
    /// Remove the entry at `address`. The name index is purged only when it
    /// still points at this address — a replacement under the same unique
    /// name must not lose its index entry.
    fn remove_at(&mut self, address: &BusAddress) -> Option<NodeInfo> {
        let node = self.nodes.remove(address)?;
        if let Some(indexed) = self.by_name.get(&node.unique_name) {
            if indexed == address {
                self.by_name.remove(&node.unique_name);
            }
        }
        Some(node)
    }
}
