use glam::DVec3;
use rayon::prelude::*;

use crate::{
    errors::LocationError,
    mesh::Mesh,
    quadrature::{gauss_legendre, tensor_points},
    spatial_index::SpatialIndex,
};

/// Maps coordinates to the global id of the cell containing them.
///
/// The locator indexes a set of Gauss points of every global cell. A query takes the cell of the
/// nearest Gauss point as first guess and confirms it (or one of its neighbours) with the inverse
/// geometry map of the mesh.
pub struct CellLocator {
    index: SpatialIndex,
    cell_of_point: Vec<usize>,
    version: u64,
}

impl CellLocator {
    /// Gauss points per direction used to seed the index.
    pub const QUADRATURE_POINTS: usize = 4;

    pub fn build<M: Mesh + ?Sized>(mesh: &M) -> Self {
        let positions: Vec<f64> = gauss_legendre(Self::QUADRATURE_POINTS)
            .into_iter()
            .map(|(x, _)| 0.5 * (x + 1.))
            .collect();
        let reference = tensor_points(&positions, mesh.dimensionality().dim());

        let (points, cell_of_point): (Vec<_>, Vec<_>) = (0..mesh.num_cells())
            .into_par_iter()
            .flat_map_iter(|cell| {
                reference
                    .iter()
                    .map(move |xi| (mesh.map_to_physical(cell, *xi), cell))
            })
            .unzip();

        Self {
            index: SpatialIndex::build(&points),
            cell_of_point,
            version: mesh.coordinate_version(),
        }
    }

    pub fn is_current<M: Mesh + ?Sized>(&self, mesh: &M) -> bool {
        self.version == mesh.coordinate_version()
    }

    /// Global id of the cell containing `point`.
    ///
    /// Points on shared cell faces are assigned to the cell with the lowest owning rank, then the
    /// lowest cell id.
    pub fn locate<M: Mesh + ?Sized>(&self, mesh: &M, point: DVec3) -> Result<usize, LocationError> {
        let outside = LocationError::OutsideDomain { point };
        let (nearest, _) = self.index.nearest(point).ok_or(outside)?;
        let candidate = self.cell_of_point[nearest];

        std::iter::once(candidate)
            .chain(mesh.cell_neighbours(candidate))
            .filter(|&cell| mesh.reference_coords(cell, point).is_some())
            .min_by_key(|&cell| (mesh.cell_owner(cell), cell))
            .ok_or(LocationError::OutsideDomain { point })
    }

    pub fn locate_all<M: Mesh + ?Sized>(
        &self,
        mesh: &M,
        points: &[DVec3],
    ) -> Vec<Result<usize, LocationError>> {
        points.par_iter().map(|p| self.locate(mesh, *p)).collect()
    }
}
