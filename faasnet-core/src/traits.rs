//! Provider traits.
//!
//! Providers take `&self`: implementations share state through `Rc`/`RefCell`
//! the same way the simulation world hands out cheap handles.

use std::time::Duration;

use crate::types::{PeerEndpoint, TimerToken};

/// Errors raised by a [`Transport`] when a datagram cannot be handed off.
///
/// A successful `send` says nothing about delivery: the network is
/// unordered and at-most-once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The driver behind this transport is gone.
    #[error("transport is shut down")]
    Shutdown,
    /// The frame is larger than the transport can carry.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Frame size in bytes.
        size: usize,
        /// Transport limit in bytes.
        max: usize,
    },
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Errors raised by a [`Scheduler`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The driver behind this scheduler is gone.
    #[error("scheduler is shut down")]
    Shutdown,
}

/// Fire-and-forget datagram transport.
pub trait Transport {
    /// Endpoint this transport sends from.
    fn local_endpoint(&self) -> PeerEndpoint;

    /// Hand a frame to the network for delivery to `to`.
    fn send(&self, to: &PeerEndpoint, frame: Vec<u8>) -> Result<(), TransportError>;
}

/// One-shot timer service.
pub trait Scheduler {
    /// Current time as seen by the driver, measured from its start.
    fn now(&self) -> Duration;

    /// Arrange for [`Process::on_timer`] to be called with `token` once
    /// `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, token: TimerToken) -> Result<(), SchedulerError>;
}

/// A node driven by datagram and timer callbacks.
///
/// Drivers never call back into a process re-entrantly: each callback runs
/// to completion before the next event is dispatched.
pub trait Process {
    /// A datagram arrived from `from`.
    fn on_datagram(&mut self, from: PeerEndpoint, frame: &[u8]);

    /// A timer armed through [`Scheduler::schedule_after`] fired.
    fn on_timer(&mut self, token: TimerToken);
}
