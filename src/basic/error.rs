//! Error types for power flow preparation and solving.
//!
//! Non-convergence is not an error: it is reported through
//! [`NewtonResult::converged`](crate::basic::NewtonResult) and
//! [`PfState::MaxIterReached`](crate::basic::PfState).

use thiserror::Error;

/// Result type alias using [`PowerFlowError`].
pub type Result<T> = std::result::Result<T, PowerFlowError>;

/// Unified error type for all power flow operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PowerFlowError {
    // ============ Data integrity ============
    /// The network description could not be deserialized.
    #[error("failed to parse network description: {0}")]
    Parse(String),

    /// An element row references a bus id that is not in the bus table.
    #[error("{table}[{row}] references unknown bus {bus}")]
    UnknownBus {
        table: &'static str,
        row: usize,
        bus: i64,
    },

    /// The same bus id appears twice in the bus table.
    #[error("bus id {bus} appears more than once in the bus table (rows {first} and {second})")]
    DuplicateBus { bus: i64, first: usize, second: usize },

    /// A mandatory element parameter is missing, NaN or out of range.
    #[error("invalid parameter '{param}' in {table}[{row}]: {reason}")]
    InvalidParameter {
        table: &'static str,
        row: usize,
        param: &'static str,
        reason: String,
    },

    /// No in-service external grid, so no reference bus can be chosen.
    #[error("no in-service external grid: the network has no reference bus")]
    NoReferenceBus,

    // ============ Numerical ============
    /// The Jacobian could not be factorised or produced a non-finite step.
    #[error("singular Jacobian at iteration {iteration}: {reason}")]
    SingularJacobian { iteration: usize, reason: String },

    // ============ Shapes ============
    /// A matrix or vector has a size inconsistent with the system.
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// The pv/pq index sets are out of range or overlap.
    #[error("invalid bus index set: {0}")]
    InvalidIndexSet(String),

    // ============ Configuration ============
    /// A configuration option is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PowerFlowError {
    /// Whether the error stems from malformed network data rather than numerics.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            PowerFlowError::Parse(_)
                | PowerFlowError::UnknownBus { .. }
                | PowerFlowError::DuplicateBus { .. }
                | PowerFlowError::InvalidParameter { .. }
                | PowerFlowError::NoReferenceBus
        )
    }
}
