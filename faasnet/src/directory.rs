use faasnet_core::PeerEndpoint;

use crate::error::{FederationError, FederationResult};

/// Ordered, append-only list of peers a node may query.
///
/// Registration order is polling order. Duplicates are kept and nothing is
/// ever removed, so indices stay stable for the node's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDirectory {
    peers: Vec<PeerEndpoint>,
}

impl PeerDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `endpoint`.
    pub fn register(&mut self, endpoint: PeerEndpoint) {
        self.peers.push(endpoint);
    }

    /// All peers in registration order.
    pub fn all(&self) -> &[PeerEndpoint] {
        &self.peers
    }

    /// Peer at `index`.
    ///
    /// # Errors
    ///
    /// [`FederationError::IndexOutOfRange`] if `index >= len()`.
    pub fn at(&self, index: usize) -> FederationResult<PeerEndpoint> {
        self.peers
            .get(index)
            .copied()
            .ok_or(FederationError::IndexOutOfRange {
                index,
                len: self.peers.len(),
            })
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
