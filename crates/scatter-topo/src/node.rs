//! One participant of the scatternet, as seen from this process.

use std::collections::BTreeSet;

use scatter_core::wire::{BusAddress, NodeStateEntry};

/// Everything known about one node: identity, reachability, and the names it
/// wants advertised or discovered.
///
/// Equality and ordering are defined solely by `address` — two snapshots of
/// the same node compare equal no matter how their name sets differ.
///
/// `connect_via` is a plain back-reference by address: when a node sits
/// behind another device in a piconet, it names the node one hop closer to
/// us. The chain is resolved with repeated database lookups, never stored
/// pointers.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub guid: String,
    pub unique_name: String,
    pub address: BusAddress,
    pub direct_minion: bool,
    pub connect_via: Option<BusAddress>,
    pub advertise_names: BTreeSet<String>,
    pub find_names: BTreeSet<String>,
    pub uuid_rev: u32,
}

impl NodeInfo {
    /// Placeholder entry carrying only an address.
    pub fn new(address: BusAddress) -> Self {
        NodeInfo {
            address,
            ..NodeInfo::default()
        }
    }

    pub fn with_identity(guid: &str, unique_name: &str, address: BusAddress) -> Self {
        NodeInfo {
            guid: guid.to_string(),
            unique_name: unique_name.to_string(),
            address,
            ..NodeInfo::default()
        }
    }

    /// A real (non-placeholder) entry has a valid bus address.
    pub fn is_valid(&self) -> bool {
        self.address.is_valid()
    }

    pub fn state_entry(&self) -> NodeStateEntry {
        NodeStateEntry {
            guid: self.guid.clone(),
            unique_name: self.unique_name.clone(),
            address: self.address,
            advertise_names: self.advertise_names.iter().cloned().collect(),
            find_names: self.find_names.iter().cloned().collect(),
        }
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for NodeInfo {}

impl PartialOrd for NodeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.address.cmp(&other.address)
    }
}
