//! Cluster peer plumbing: transports, broadcast and the peer RPC endpoint

pub mod broadcast;
pub mod rpc;
pub mod server;
pub mod service;
pub mod transport;

use thiserror::Error;

use crate::error::ApiError;

pub use broadcast::{BroadcastResult, PeerBroadcaster, PeerHandle};
pub use rpc::{PeerRequest, ServiceSignal};
pub use service::PeerService;
pub use transport::{HttpTransport, LocalTransport, PeerTransport};

/// Failure of a single peer call; advisory, never aborts a broadcast
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("peer transport not established: {0}")]
    NotEstablished(String),

    #[error("peer unreachable: {0}")]
    Transport(String),

    #[error("peer answered {status} {code}: {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },

    #[error("peer RPC version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: String, remote: String },

    #[error("malformed peer response: {0}")]
    Decode(String),
}

impl From<ApiError> for PeerError {
    fn from(err: ApiError) -> Self {
        PeerError::Remote {
            status: err.code.status().as_u16(),
            code: err.code.code().to_string(),
            message: err.message().to_string(),
        }
    }
}
