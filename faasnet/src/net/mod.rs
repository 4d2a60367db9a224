//! Real-network drivers.
//!
//! The same [`FaasNode`](crate::FaasNode) that runs in simulation runs here
//! over a tokio UDP socket and the tokio clock.

mod udp;

pub use udp::{TokioScheduler, UdpNode, UdpTransport};
