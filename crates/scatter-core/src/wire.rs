//! Scatter wire format — on-wire types for the topology control protocol.
//!
//! These types ARE the protocol. Every node in a scatternet group exchanges
//! exactly these shapes, so changing a field here is a breaking change for
//! every peer on the air. All lists are order-irrelevant; senders are free
//! to emit them in any order and receivers must not depend on one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Addresses ─────────────────────────────────────────────────────────────────

/// 48-bit Bluetooth hardware address, stored in the low bits of a u64.
/// The upper 16 bits are always zero.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceAddress(u64);

impl DeviceAddress {
    pub const MASK: u64 = 0x0000_ffff_ffff_ffff;

    pub fn new(raw: u64) -> Self {
        DeviceAddress(raw & Self::MASK)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        // Skip the two zero padding bytes of the u64.
        let hex = hex::encode(&bytes[2..]);
        let mut parts = Vec::with_capacity(6);
        for i in 0..6 {
            parts.push(&hex[i * 2..i * 2 + 2]);
        }
        write!(f, "{}", parts.join(":"))
    }
}

impl FromStr for DeviceAddress {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.split(':').collect();
        if compact.len() != 12 {
            return Err(WireError::BadAddress(s.to_string()));
        }
        let bytes = hex::decode(&compact).map_err(|_| WireError::BadAddress(s.to_string()))?;
        let mut raw = [0u8; 8];
        raw[2..].copy_from_slice(&bytes);
        Ok(DeviceAddress(u64::from_be_bytes(raw)))
    }
}

/// Full bus address of one node: hardware address plus the 16-bit service
/// channel it listens on. Valid iff the service id is not the reserved
/// [`INVALID_SERVICE_ID`]. Ordered by (device, service_id).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BusAddress {
    pub device: DeviceAddress,
    pub service_id: u16,
}

impl BusAddress {
    pub fn new(device: DeviceAddress, service_id: u16) -> Self {
        BusAddress { device, service_id }
    }

    pub fn is_valid(&self) -> bool {
        self.service_id != INVALID_SERVICE_ID
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:04x}", self.device, self.service_id)
    }
}

// ── State snapshot entries ────────────────────────────────────────────────────

/// One directly-known node, as carried in a state-exchange request or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateEntry {
    pub guid: String,
    pub unique_name: String,
    pub address: BusAddress,
    pub advertise_names: Vec<String>,
    pub find_names: Vec<String>,
}

/// Advertised names of one node, grouped under the connect address that
/// physically reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdNameEntry {
    pub guid: String,
    pub address: BusAddress,
    pub names: Vec<String>,
}

/// One discovered-but-unconnected device group: everything advertised under
/// a single connect address at a single advertisement revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundNodeEntry {
    pub connect_address: BusAddress,
    pub uuid_rev: u32,
    pub ad_names: Vec<AdNameEntry>,
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Control protocol version, carried in every state-exchange request and
/// reply. Used to break mastery ties between equally-sized groups.
pub const PROTOCOL_VERSION: u32 = 1;

/// Reserved service id marking an address as a placeholder.
/// L2CAP PSM 0 is reserved by the Bluetooth spec, so no real node uses it.
pub const INVALID_SERVICE_ID: u16 = 0;

/// Reserved advertisement revision marking "no revision known".
pub const INVALID_UUID_REV: u32 = 0;

/// Seconds between minion-rotation handoffs, and the grace period before a
/// stopped advertisement actually leaves the air.
pub const DELEGATE_TIME_SECS: u64 = 30;

/// Milliseconds a discovered device stays cached without being re-seen.
pub const LOST_DEVICE_TIMEOUT_MS: u64 = 30_000;

/// Hard ceiling on simultaneous radio connections (one master + minions).
pub const ABSOLUTE_MAX_CONNECTIONS: usize = 7;

/// Default connection ceiling, below the absolute maximum to leave one slot
/// free for outbound joins. Overridable via config.
pub const DEFAULT_MAX_CONNECTIONS: usize = 6;

/// Seconds an unanswered state-exchange request waits before the connection
/// is torn down.
pub const SET_STATE_TIMEOUT_SECS: u64 = 30;

/// Half-width of the revision window considered a collision when two groups
/// merge: the surviving master re-picks its revision until it is at least
/// this far from the one just learned.
pub const UUID_REV_COLLISION_WINDOW: u32 = 10;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed device address: {0:?}")]
    BadAddress(String),

    #[error("malformed signal payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
