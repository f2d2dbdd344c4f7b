use glam::DVec3;
use thiserror::Error;

use crate::channel::DataType;

/// Access to particle data outside of an authorised transaction.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Data of variable `{0}` must be accessed via the swarm `access()` transaction")]
    NoTransaction(String),
    #[error("Variable `{0}` was not declared writable in the enclosing transaction")]
    NotWritable(String),
    #[error("Variable `{name}` holds {found:?} data, but {expected:?} data was requested")]
    TypeMismatch {
        name: String,
        expected: DataType,
        found: DataType,
    },
    #[error("No variable registered with id {0}")]
    UnknownVariable(usize),
    #[error("Variable `{name}` expects {expected} values, but {found} were provided")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Received a migration packet of {found} values where {expected} were expected, variable registration differs between ranks")]
    InconsistentPacket { expected: usize, found: usize },
}

/// A coordinate that cannot be mapped to an owned cell.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Point {point} lies outside of every cell of the mesh")]
    OutsideDomain { point: DVec3 },
    #[error("Point {point} lies in cell {cell}, which is owned by rank {owner}")]
    NotLocal {
        point: DVec3,
        cell: usize,
        owner: usize,
    },
    #[error("{count} particle(s) could not be located on other ranks, migration aborted")]
    RemoteFailure { count: usize },
}

/// Malformed registration or construction parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Variable with name `{0}` already exists on swarm")]
    DuplicateName(String),
    #[error("Variable `{name}` cannot have {count} components")]
    InvalidComponentCount { name: String, count: usize },
    #[error("Variable `{name}` has {expected} components, but {found} were provided")]
    ComponentMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Provided dtype `{0}` is not supported, supported types are `int` and `float`")]
    UnsupportedDataType(String),
    #[error("Index variable `{0}` needs at least one category")]
    InvalidCategoryCount(String),
    #[error("Fill parameter {fill_param} is not valid for the {layout} layout")]
    InvalidFillParameter { layout: String, fill_param: usize },
    #[error("Unknown particle layout: {0}")]
    UnknownLayout(String),
    #[error("Unsupported proxy discretisation: degree {degree}, continuous: {continuous}")]
    InvalidProxyDegree { degree: u8, continuous: bool },
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
    #[error("Unknown type of boundary condition configured: {0}")]
    UnknownBoundary(String),
    #[error("Unknown integration order: {0}")]
    UnknownOrder(String),
}

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
