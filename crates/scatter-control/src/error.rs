//! Control-plane error taxonomy.

use scatter_core::wire::WireError;

/// Errors surfaced by the controller and its collaborators.
///
/// None of these are fatal to the process: transport and radio failures
/// leave the affected operation inactive, and protocol violations are
/// logged and dropped without a reply.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("no route to peer {0}")]
    UnknownPeer(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("radio failure: {0}")]
    Radio(String),

    #[error("radio device not available")]
    DeviceUnavailable,

    #[error("controller is shutting down")]
    Shutdown,
}
