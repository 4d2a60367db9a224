use faasnet_core::PeerEndpoint;
use thiserror::Error;

/// Errors that can occur during simulation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// The simulation has been dropped and is no longer accessible.
    #[error("Simulation has been shut down")]
    SimulationShutdown,
    /// The simulation is in an invalid state.
    #[error("Invalid simulation state: {0}")]
    InvalidState(String),
    /// A process is already bound to this endpoint.
    #[error("endpoint {0} already has a registered process")]
    DuplicateEndpoint(PeerEndpoint),
}

/// A type alias for `Result<T, SimulationError>`.
pub type SimulationResult<T> = Result<T, SimulationError>;
