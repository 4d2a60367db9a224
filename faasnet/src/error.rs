use faasnet_core::TransportError;

use crate::codec::CodecError;
use crate::runtime::EngineError;
use crate::types::{ModuleName, NameError};

/// Errors surfaced by the federation protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FederationError {
    /// An inbound datagram could not be decoded. Dropped without reply.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] CodecError),
    /// Peer directory access past its end.
    #[error("peer index {index} out of range for a directory of {len}")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Directory size.
        len: usize,
    },
    /// Every peer was asked and none could resolve the module.
    #[error("module {module} not found on any peer")]
    ModuleNotFoundAnywhere {
        /// Module that was requested.
        module: ModuleName,
    },
    /// The local execution engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A module or function name is invalid.
    #[error(transparent)]
    InvalidName(#[from] NameError),
    /// Too many requests are already waiting behind the active query.
    #[error("deferred queue is full ({capacity} requests waiting)")]
    DeferredQueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },
    /// The transport refused a frame.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A type alias for `Result<T, FederationError>`.
pub type FederationResult<T> = Result<T, FederationError>;
