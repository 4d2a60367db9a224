use serde::Serialize;

/// Protocol counters for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FederationStats {
    /// Local executions answered from the cache.
    pub local_hits: u64,
    /// Federated queries started for local callers.
    pub queries_started: u64,
    /// Local queries that produced a result.
    pub queries_resolved: u64,
    /// Local queries that ran out of peers.
    pub queries_exhausted: u64,
    /// Queries started on behalf of another node.
    pub relays_started: u64,
    /// Relays answered with `r`.
    pub relays_resolved: u64,
    /// Relays answered with `n`.
    pub relays_exhausted: u64,
    /// Remote `e` answered from the local cache.
    pub requests_served: u64,
    /// Requests parked behind the in-flight query.
    pub requests_deferred: u64,
    /// Remote requests refused because the deferred queue was full.
    pub requests_rejected: u64,
    /// `l` answered with bytecode.
    pub loads_served: u64,
    /// `l` answered with `n` because the bytecode does not fit a datagram.
    pub loads_oversized: u64,
    /// Modules added to the cache from a peer.
    pub modules_cached: u64,
    /// Peer replies that never arrived in time.
    pub reply_timeouts: u64,
    /// Replies that matched no outstanding send.
    pub stale_replies: u64,
    /// Frames handed to the transport.
    pub frames_sent: u64,
    /// Frames received and decoded.
    pub frames_received: u64,
    /// Frames dropped as malformed.
    pub frames_malformed: u64,
    /// Frames or timers the driver failed to hand off.
    pub driver_failures: u64,
}
