//! Control signals exchanged between peer topology managers.
//!
//! Every inter-node interaction — the state-exchange handshake, name
//! registration, delegation, and discovery notifications — is one of the
//! [`Signal`] variants below, serialized as tagged JSON.

use serde::{Deserialize, Serialize};

use crate::wire::{BusAddress, DeviceAddress, FoundNodeEntry, NodeStateEntry, WireError};

/// State-exchange request, sent by the connecting side immediately after a
/// new link comes up. Carries the sender's entire directly-known topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStateRequest {
    pub protocol_version: u32,
    pub minion_count: usize,
    pub uuid_rev: u32,
    pub address: BusAddress,
    pub node_states: Vec<NodeStateEntry>,
    pub found_nodes: Vec<FoundNodeEntry>,
}

/// State-exchange reply. An empty `node_states` list tells the requester it
/// lost the mastery comparison and is now a minion of the replier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStateReply {
    pub protocol_version: u32,
    pub uuid_rev: u32,
    pub address: BusAddress,
    pub node_states: Vec<NodeStateEntry>,
    pub found_nodes: Vec<FoundNodeEntry>,
}

/// All control-plane traffic between peer nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Signal {
    SetStateRequest(SetStateRequest),

    SetStateReply(SetStateReply),

    /// Register interest in discovering `name` on behalf of `requestor`.
    FindName {
        requestor: String,
        requestor_address: BusAddress,
        name: String,
    },

    CancelFindName {
        requestor: String,
        requestor_address: BusAddress,
        name: String,
    },

    /// Register `name` for advertisement on behalf of `requestor`.
    AdvertiseName {
        requestor: String,
        requestor_address: BusAddress,
        name: String,
    },

    CancelAdvertiseName {
        requestor: String,
        requestor_address: BusAddress,
        name: String,
    },

    /// Master → minion: put these names on the air. An empty `ad_names`
    /// list means stop advertising (the identity fields stay populated so
    /// peers can clean their caches).
    DelegateAdvertise {
        uuid_rev: u32,
        address: BusAddress,
        ad_names: Vec<FoundNodeEntry>,
        duration_secs: u64,
    },

    /// Master → minion: run discovery, reporting raw results to
    /// `result_dest`. An empty `result_dest` means stop.
    DelegateFind {
        result_dest: String,
        ignore_addrs: Vec<DeviceAddress>,
        duration_secs: u64,
    },

    /// Names that became reachable, grouped by connect address.
    FoundNames { entries: Vec<FoundNodeEntry> },

    /// Names that are no longer reachable.
    LostNames { entries: Vec<FoundNodeEntry> },

    /// Find-minion → master: a device was seen advertising `uuid_rev`.
    FoundDevice {
        device: DeviceAddress,
        uuid_rev: u32,
    },
}

impl Signal {
    /// Serialize for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a received signal.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(data)?)
    }
}
