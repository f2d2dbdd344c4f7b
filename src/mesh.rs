//! The mesh collaborator contract consumed by the swarm.
//!
//! The swarm never inspects mesh topology directly: it asks for cell geometry, cell ownership and
//! node coordinates of a given discretisation, and relies on the coordinate version to know when
//! cached spatial indexes have become stale.

use glam::DVec3;

use crate::{errors::ConfigError, utils::Dimensionality};

mod structured;

pub use structured::StructuredMesh;

/// Identifies a nodal discretisation (polynomial degree and continuity) on a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub degree: u8,
    pub continuous: bool,
}

impl NodeKey {
    pub const MAX_DEGREE: u8 = 4;

    pub fn new(degree: u8, continuous: bool) -> Result<Self, ConfigError> {
        if degree > Self::MAX_DEGREE || (degree == 0 && continuous) {
            return Err(ConfigError::InvalidProxyDegree { degree, continuous });
        }
        Ok(Self { degree, continuous })
    }

    /// 1D reference positions (in `[0, 1]`) of the nodes inside a cell.
    pub fn reference_nodes(&self) -> Vec<f64> {
        let p = self.degree as usize;
        if self.continuous {
            (0..=p).map(|j| j as f64 / p as f64).collect()
        } else {
            (0..=p).map(|j| (j as f64 + 0.5) / (p + 1) as f64).collect()
        }
    }
}

/// Local node coordinates of a discretisation, valid for one coordinate version of the mesh.
#[derive(Clone, Debug)]
pub struct NodeLayout {
    pub key: NodeKey,
    pub version: u64,
    pub coords: Vec<DVec3>,
    /// Whether this process owns the node. Nodes on partition boundaries appear on every
    /// neighbouring rank but are owned by exactly one of them.
    pub owned: Vec<bool>,
}

impl NodeLayout {
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

pub trait Mesh: Send + Sync {
    fn dimensionality(&self) -> Dimensionality;

    /// Incremented whenever node coordinates change.
    fn coordinate_version(&self) -> u64;

    /// Global number of cells.
    fn num_cells(&self) -> usize;

    /// Global ids of the cells owned by this process, in ascending order.
    fn local_cells(&self) -> Vec<usize>;

    fn cell_owner(&self, cell: usize) -> usize;

    fn cell_neighbours(&self, cell: usize) -> Vec<usize>;

    /// Map reference coordinates in `[0, 1]^dim` to physical space.
    fn map_to_physical(&self, cell: usize, reference: DVec3) -> DVec3;

    /// Inverse of [`Mesh::map_to_physical`], `None` when the point lies outside of the cell.
    fn reference_coords(&self, cell: usize, point: DVec3) -> Option<DVec3>;

    fn nodes(&self, key: NodeKey) -> NodeLayout;

    /// Evaluate a nodal field (node-major, `num_components` values per node) inside a local cell.
    fn interpolate(
        &self,
        key: NodeKey,
        values: &[f64],
        num_components: usize,
        cell: usize,
        reference: DVec3,
    ) -> Option<Vec<f64>>;

    /// Minimum distance from any local cell centroid to one of its faces.
    fn min_radius(&self) -> f64;
}

/// Tensor product Lagrange basis on the given 1D nodes, evaluated at `x`.
pub fn lagrange_basis(nodes: &[f64], x: f64) -> Vec<f64> {
    (0..nodes.len())
        .map(|a| {
            nodes
                .iter()
                .enumerate()
                .filter(|(m, _)| *m != a)
                .map(|(_, r)| (x - r) / (nodes[a] - r))
                .product::<f64>()
        })
        .collect()
}
