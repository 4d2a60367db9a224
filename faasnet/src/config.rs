use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port nodes listen on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 3000;

/// Per-node protocol configuration.
///
/// ```
/// use faasnet::NodeConfig;
/// use std::time::Duration;
///
/// let config = NodeConfig::default()
///     .with_tick_interval(Duration::from_millis(50))
///     .with_reply_timeout(Duration::from_millis(400));
/// assert_eq!(config.reply_timeout, Some(Duration::from_millis(400)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Delay between two polling steps of a federated query.
    pub tick_interval: Duration,
    /// How long to wait for a peer's reply before moving on.
    ///
    /// `None` waits forever: a lost reply stalls the query, which is the
    /// plain unreliable-transport behaviour.
    pub reply_timeout: Option<Duration>,
    /// Requests that may wait behind the in-flight query.
    pub deferred_capacity: usize,
    /// Port [`UdpNode::bind`](crate::UdpNode::bind) listens on.
    pub port: u16,
    /// When relaying, never poll the peer that asked.
    pub skip_requester: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            reply_timeout: None,
            deferred_capacity: 64,
            port: DEFAULT_PORT,
            skip_requester: false,
        }
    }
}

impl NodeConfig {
    /// Set the polling tick.
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Enable per-request reply timeouts.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Bound the deferred request queue.
    pub fn with_deferred_capacity(mut self, capacity: usize) -> Self {
        self.deferred_capacity = capacity;
        self
    }

    /// Set the UDP port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Skip the requester when relaying.
    pub fn with_skip_requester(mut self, skip: bool) -> Self {
        self.skip_requester = skip;
        self
    }
}

/// Serializable form of [`NodeConfig`], with durations in milliseconds.
///
/// Missing fields take the [`NodeConfig`] defaults. Scenario nodes carry
/// their own endpoints, so the listening port is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSettings {
    /// See [`NodeConfig::tick_interval`].
    pub tick_interval_ms: u64,
    /// See [`NodeConfig::reply_timeout`].
    pub reply_timeout_ms: Option<u64>,
    /// See [`NodeConfig::deferred_capacity`].
    pub deferred_capacity: usize,
    /// See [`NodeConfig::skip_requester`].
    pub skip_requester: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeConfig::default().into()
    }
}

impl From<NodeConfig> for NodeSettings {
    fn from(config: NodeConfig) -> Self {
        Self {
            tick_interval_ms: config.tick_interval.as_millis() as u64,
            reply_timeout_ms: config.reply_timeout.map(|t| t.as_millis() as u64),
            deferred_capacity: config.deferred_capacity,
            skip_requester: config.skip_requester,
        }
    }
}

impl From<NodeSettings> for NodeConfig {
    fn from(settings: NodeSettings) -> Self {
        Self {
            tick_interval: Duration::from_millis(settings.tick_interval_ms),
            reply_timeout: settings.reply_timeout_ms.map(Duration::from_millis),
            deferred_capacity: settings.deferred_capacity,
            port: DEFAULT_PORT,
            skip_requester: settings.skip_requester,
        }
    }
}
