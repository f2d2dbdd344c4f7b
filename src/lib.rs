//! Lagrangian particle swarms on distributed finite element meshes.
//!
//! A [`Swarm`] carries particles with arbitrary attached variables through a [`Mesh`]. Particle
//! data is only reachable through [`Access`] transactions, whose commits relocate and migrate the
//! particles between ranks and refresh the nodal proxy fields reconstructed from them.

pub use access::Access;
pub use advection::{AdvectionOptions, IntegrationOrder, LaunchPoint, VelocityField};
pub use cell_locator::CellLocator;
pub use channel::{Channel, ChannelData, DataType, Proxy, ProxyOptions, VarId};
pub use comm::{thread_world, Communicator, MigrationPacket, ReduceOp, SingleProcess, ThreadComm};
#[cfg(feature = "mpi")]
pub use comm::MpiComm;
pub use errors::{ConfigError, LocationError, StateError, SwarmError};
pub use field::{FieldStats, MeshField, NodalFunction};
pub use material::MaterialMasks;
pub use mesh::{Mesh, NodeKey, NodeLayout, StructuredMesh};
pub use projector::{FieldProjector, ProjectionMap, WEIGHT_EPSILON};
pub use quadrature::FillLayout;
pub use restore::{Boundary, BoxRestore, PointRestore};
pub use spatial_index::SpatialIndex;
pub use swarm::Swarm;
pub use utils::Dimensionality;

mod access;
mod advection;
mod cell_locator;
mod channel;
mod comm;
mod errors;
mod field;
mod material;
pub mod mesh;
mod projector;
pub mod quadrature;
mod restore;
mod spatial_index;
mod swarm;
mod utils;
