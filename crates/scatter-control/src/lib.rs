//! Scatternet topology control.
//!
//! One [`Controller`] per process owns the node's role (master, drone, or
//! minion), the connected-node and found-node databases, and the
//! delegation of radio work across the group. It talks to the outside
//! world only through the [`Radio`] and [`ControlLink`] traits.

pub mod controller;
pub mod delegate;
pub mod error;
pub mod radio;
pub mod work;

pub use controller::{Command, Controller, ControllerHandle, Role, StatusReport};
pub use error::ControlError;
pub use radio::{ControlLink, DeviceInfo, Radio};
