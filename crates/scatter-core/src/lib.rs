//! scatter-core — wire types, control signals, and configuration.
//! All other Scatter crates depend on this one.

pub mod config;
pub mod signal;
pub mod wire;

pub use signal::{SetStateReply, SetStateRequest, Signal};
pub use wire::{AdNameEntry, BusAddress, DeviceAddress, FoundNodeEntry, NodeStateEntry};
