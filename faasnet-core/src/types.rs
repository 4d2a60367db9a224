//! Endpoint and timer identifiers.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Network endpoint of a node: IP address plus UDP port.
///
/// Endpoints are immutable values; the peer directory stores them in
/// registration order and duplicates are allowed.
///
/// # Examples
///
/// ```
/// use faasnet_core::PeerEndpoint;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let endpoint = PeerEndpoint::new(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)), 3000);
/// assert_eq!(endpoint.to_string(), "10.1.1.1:3000");
/// assert_eq!(PeerEndpoint::parse("10.1.1.1:3000").ok(), Some(endpoint));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerEndpoint {
    /// IP address (IPv4 or IPv6).
    pub ip: IpAddr,
    /// UDP port.
    pub port: u16,
}

impl PeerEndpoint {
    /// Create a new endpoint.
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse from `ip:port`, accepting `[v6]:port` for IPv6.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP or the port cannot be parsed.
    pub fn parse(s: &str) -> Result<Self, PeerEndpointParseError> {
        if let Some(bracket_end) = s.rfind(']') {
            if !s.starts_with('[') {
                return Err(PeerEndpointParseError::InvalidIp(s.to_string()));
            }
            let port_str = s
                .get(bracket_end + 1..)
                .and_then(|rest| rest.strip_prefix(':'))
                .ok_or_else(|| PeerEndpointParseError::MissingPort(s.to_string()))?;
            let ip: IpAddr = s[1..bracket_end]
                .parse()
                .map_err(|_| PeerEndpointParseError::InvalidIp(s.to_string()))?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| PeerEndpointParseError::InvalidPort(s.to_string()))?;
            return Ok(Self::new(ip, port));
        }

        let (ip_str, port_str) = s
            .rsplit_once(':')
            .ok_or_else(|| PeerEndpointParseError::MissingPort(s.to_string()))?;
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| PeerEndpointParseError::InvalidIp(s.to_string()))?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| PeerEndpointParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(ip, port))
    }

    /// Convert to a standard socket address.
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl std::fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

impl FromStr for PeerEndpoint {
    type Err = PeerEndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerEndpoint {
    type Error = PeerEndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerEndpoint> for String {
    fn from(value: PeerEndpoint) -> Self {
        value.to_string()
    }
}

impl From<SocketAddr> for PeerEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

/// Error parsing a [`PeerEndpoint`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerEndpointParseError {
    /// The IP address could not be parsed.
    #[error("invalid IP address in {0:?}")]
    InvalidIp(String),
    /// The port number could not be parsed.
    #[error("invalid port number in {0:?}")]
    InvalidPort(String),
    /// No `:port` suffix.
    #[error("missing port separator in {0:?}")]
    MissingPort(String),
}

/// Opaque identifier of a one-shot timer.
///
/// Tokens are allocated by the node that arms the timer and handed back
/// unchanged in [`crate::Process::on_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerToken(pub u64);

impl std::fmt::Display for TimerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}
