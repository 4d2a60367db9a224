use std::time::Duration;

use faasnet_core::PeerEndpoint;

use crate::codec::{ExecuteRequest, Message};
use crate::error::FederationResult;
use crate::types::QueryId;

/// Who a federated query answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A caller on this node; the answer is a [`QueryCompletion`].
    Local,
    /// Another node's `e`; the answer is an `r` or `n` sent back to it.
    Relay {
        /// Node that asked.
        requester: PeerEndpoint,
    },
}

impl Origin {
    /// Requester for relayed queries.
    pub fn requester(&self) -> Option<PeerEndpoint> {
        match self {
            Origin::Local => None,
            Origin::Relay { requester } => Some(*requester),
        }
    }
}

/// A peer send that has not been answered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outstanding {
    /// Peer the message went to.
    pub peer: PeerEndpoint,
    /// Attempt number, matched against reply timeouts.
    pub attempt: u64,
}

/// Progress of a federated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Asking peers one at a time.
    Polling {
        /// Index of the next peer to ask.
        cursor: usize,
        /// The `e` currently waiting for an answer. At most one.
        outstanding: Option<Outstanding>,
    },
    /// A peer answered; fetching its bytecode before finishing.
    Loading {
        /// Result the peer returned.
        result: i32,
        /// The `l` waiting for its `c`.
        outstanding: Outstanding,
    },
}

/// The single in-flight multi-hop request of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedQuery {
    /// Identifier, unique per node.
    pub id: QueryId,
    /// What to run.
    pub request: ExecuteRequest,
    /// Who gets the answer.
    pub origin: Origin,
    /// Current phase.
    pub phase: Phase,
    /// Peer messages sent so far.
    pub attempts: u64,
}

impl FederatedQuery {
    pub(crate) fn new(id: QueryId, request: ExecuteRequest, origin: Origin) -> Self {
        Self {
            id,
            request,
            origin,
            phase: Phase::Polling {
                cursor: 0,
                outstanding: None,
            },
            attempts: 0,
        }
    }

    /// Whether a peer message is awaiting its reply.
    pub fn is_busy(&self) -> bool {
        match self.phase {
            Phase::Polling { outstanding, .. } => outstanding.is_some(),
            Phase::Loading { .. } => true,
        }
    }
}

/// Observable node state, derived from the in-flight query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No query in flight.
    Idle,
    /// Polling peers for a local caller.
    Querying {
        /// Query identifier.
        query: QueryId,
        /// Next peer index.
        cursor: usize,
    },
    /// Polling peers on behalf of another node.
    Relaying {
        /// Query identifier.
        query: QueryId,
        /// Next peer index.
        cursor: usize,
        /// Node that asked.
        requester: PeerEndpoint,
    },
    /// Result known, waiting for the bytecode to cache it.
    ResolvedLocal {
        /// Query identifier.
        query: QueryId,
        /// Result to deliver.
        result: i32,
    },
}

impl From<Option<&FederatedQuery>> for NodeState {
    fn from(query: Option<&FederatedQuery>) -> Self {
        let Some(query) = query else {
            return NodeState::Idle;
        };
        match (query.phase, query.origin) {
            (Phase::Loading { result, .. }, _) => NodeState::ResolvedLocal {
                query: query.id,
                result,
            },
            (Phase::Polling { cursor, .. }, Origin::Local) => NodeState::Querying {
                query: query.id,
                cursor,
            },
            (Phase::Polling { cursor, .. }, Origin::Relay { requester }) => NodeState::Relaying {
                query: query.id,
                cursor,
                requester,
            },
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Idle => f.write_str("idle"),
            NodeState::Querying { query, cursor } => write!(f, "querying {query} at peer {cursor}"),
            NodeState::Relaying {
                query,
                cursor,
                requester,
            } => write!(f, "relaying {query} for {requester} at peer {cursor}"),
            NodeState::ResolvedLocal { query, result } => {
                write!(f, "resolved {query} = {result}, loading module")
            }
        }
    }
}

/// Timers the engine asks its driver to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Run the next polling step of `query`.
    QueryStep {
        /// Query to advance.
        query: QueryId,
    },
    /// Give up waiting for the reply to `attempt`.
    ReplyTimeout {
        /// Query the send belongs to.
        query: QueryId,
        /// Attempt being timed.
        attempt: u64,
    },
}

/// Final outcome of a locally originated execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCompletion {
    /// Identifier returned by `execute_module`.
    pub id: QueryId,
    /// The request that was run.
    pub request: ExecuteRequest,
    /// Function result, or why none could be produced.
    pub result: FederationResult<i32>,
}

/// Side effects produced by the engine, applied by the driver in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send `message` to `to`.
    Send {
        /// Destination.
        to: PeerEndpoint,
        /// Message to frame and send.
        message: Message,
    },
    /// Arm `timer` to fire after `delay`.
    Schedule {
        /// Delay from now.
        delay: Duration,
        /// Timer to hand back.
        timer: Timer,
    },
    /// A local execution finished.
    Complete(QueryCompletion),
}

/// Immediate answer to a local `execute_module` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The module was cached; here is the result.
    Completed(i32),
    /// The request went to the network; a completion with this id follows.
    Pending(QueryId),
}

/// A request waiting for the in-flight query to finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Deferred {
    /// `e` from another node.
    Remote {
        from: PeerEndpoint,
        request: ExecuteRequest,
    },
    /// `execute_module` on this node.
    Local { id: QueryId, request: ExecuteRequest },
}
