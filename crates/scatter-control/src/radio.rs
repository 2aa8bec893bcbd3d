//! Collaborator seams: the physical radio and the inter-node control link.
//!
//! The controller never talks to BlueZ or a message bus directly; it drives
//! these two trait objects. Production wires real drivers in, tests wire in
//! scripted fakes.

use std::collections::BTreeSet;

use scatter_core::signal::Signal;
use scatter_core::wire::{BusAddress, DeviceAddress, FoundNodeEntry};

use crate::error::ControlError;

/// Result of a full device-information query: the advertisement revision,
/// the address a connection must physically target, and everything
/// advertised under that connect address.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub uuid_rev: u32,
    pub connect_address: BusAddress,
    pub ad_names: Vec<FoundNodeEntry>,
}

/// The physical Bluetooth radio, as the controller sees it.
///
/// `get_device_info` is a slow SDP-style query; the controller runs it on
/// its own task, serializing concurrent device-change reports in arrival
/// order.
pub trait Radio: Send + Sync {
    fn start_find(
        &self,
        ignore_addrs: &BTreeSet<DeviceAddress>,
        duration_secs: u64,
    ) -> Result<(), ControlError>;

    fn stop_find(&self) -> Result<(), ControlError>;

    fn start_advertise(
        &self,
        uuid_rev: u32,
        address: BusAddress,
        ad_names: &[FoundNodeEntry],
        duration_secs: u64,
    ) -> Result<(), ControlError>;

    fn stop_advertise(&self) -> Result<(), ControlError>;

    /// Start accepting inbound connections; returns the local bus address.
    fn start_listen(&self) -> Result<BusAddress, ControlError>;

    fn stop_listen(&self);

    fn get_device_info(&self, device: DeviceAddress) -> Result<DeviceInfo, ControlError>;

    fn disconnect(&self, unique_name: &str) -> Result<(), ControlError>;

    /// Local-process discovery callback: tell the application layer that
    /// `names` advertised by `guid` at `address` appeared or vanished.
    fn found_names_change(
        &self,
        guid: &str,
        names: &BTreeSet<String>,
        address: BusAddress,
        lost: bool,
    );
}

/// The control-plane messaging link between peer topology managers.
pub trait ControlLink: Send + Sync {
    /// Deliver `signal` to the peer bus name `dest`. Fire-and-forget; a
    /// delivery failure surfaces as an error but is never fatal.
    fn send_signal(&self, dest: &str, signal: &Signal) -> Result<(), ControlError>;
}
