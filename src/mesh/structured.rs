use glam::{DMat3, DVec3};

use super::{lagrange_basis, Mesh, NodeKey, NodeLayout};
use crate::{
    errors::ConfigError,
    restore::{BoxRestore, Boundary},
    utils::Dimensionality,
};

/// Tolerance on reference coordinates when deciding whether a point lies inside a cell.
const REFERENCE_TOLERANCE: f64 = 1e-10;
const NEWTON_MAX_ITER: usize = 30;

/// A box of quadrilateral (2D) or hexahedral (3D) cells with bilinear/trilinear geometry.
///
/// Every rank holds the full vertex set, cells are distributed in contiguous slabs of columns
/// along the x axis.
#[derive(Clone, Debug)]
pub struct StructuredMesh {
    dimensionality: Dimensionality,
    resolution: [usize; 3],
    vertices: Vec<DVec3>,
    version: u64,
    rank: usize,
    /// Column offsets of every rank's slab, `size + 1` entries
    partition: Vec<usize>,
}

impl StructuredMesh {
    pub fn new(
        dimensionality: Dimensionality,
        resolution: &[usize],
        min: DVec3,
        max: DVec3,
    ) -> Result<Self, ConfigError> {
        let dim = dimensionality.dim();
        if resolution.len() != dim {
            return Err(ConfigError::InvalidMesh(format!(
                "expected {dim} resolution entries, found {}",
                resolution.len()
            )));
        }
        if resolution.iter().any(|&n| n == 0) {
            return Err(ConfigError::InvalidMesh(format!(
                "resolution {resolution:?} contains empty directions"
            )));
        }
        if (0..dim).any(|d| max[d] <= min[d]) {
            return Err(ConfigError::InvalidMesh(format!(
                "degenerate domain from {min} to {max}"
            )));
        }

        let mut res = [1; 3];
        res[..dim].copy_from_slice(resolution);
        let layers = if dim == 3 { res[2] + 1 } else { 1 };
        let mut vertices = Vec::with_capacity((res[0] + 1) * (res[1] + 1) * layers);
        for k in 0..layers {
            for j in 0..=res[1] {
                for i in 0..=res[0] {
                    let frac = DVec3::new(
                        i as f64 / res[0] as f64,
                        j as f64 / res[1] as f64,
                        if dim == 3 { k as f64 / res[2] as f64 } else { 0. },
                    );
                    let mut v = min + frac * (max - min);
                    if dim == 2 {
                        v.z = 0.;
                    }
                    vertices.push(v);
                }
            }
        }

        Ok(Self {
            dimensionality,
            resolution: res,
            vertices,
            version: 0,
            rank: 0,
            partition: vec![0, res[0]],
        })
    }

    /// A `n x n` mesh of the unit square.
    pub fn unit_square(n: usize) -> Result<Self, ConfigError> {
        Self::new(
            Dimensionality::TwoD,
            &[n, n],
            DVec3::ZERO,
            DVec3::new(1., 1., 0.),
        )
    }

    /// Restrict ownership to the slab of rank `rank` out of `size`.
    pub fn partitioned(mut self, rank: usize, size: usize) -> Result<Self, ConfigError> {
        let nx = self.resolution[0];
        if size == 0 || rank >= size || size > nx {
            return Err(ConfigError::InvalidMesh(format!(
                "cannot give rank {rank} of {size} a slab of {nx} columns"
            )));
        }
        let base = nx / size;
        let rem = nx % size;
        self.partition = (0..=size).map(|r| r * base + r.min(rem)).collect();
        self.rank = rank;
        Ok(self)
    }

    pub fn resolution(&self) -> &[usize] {
        &self.resolution[..self.dimensionality.dim()]
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The range of cell columns owned by this rank.
    pub fn local_columns(&self) -> (usize, usize) {
        (self.partition[self.rank], self.partition[self.rank + 1])
    }

    /// Move every vertex through `f`. Invalidates all node coordinates derived from the mesh.
    pub fn deform(&mut self, f: impl Fn(DVec3) -> DVec3) {
        let dim = self.dimensionality.dim();
        for v in self.vertices.iter_mut() {
            *v = f(*v);
            if dim == 2 {
                v.z = 0.;
            }
        }
        self.version += 1;
    }

    /// Axis aligned bounding box of the (possibly deformed) vertices.
    pub fn bounds(&self) -> (DVec3, DVec3) {
        self.vertices.iter().fold(
            (DVec3::splat(f64::INFINITY), DVec3::splat(f64::NEG_INFINITY)),
            |(lo, hi), v| (lo.min(*v), hi.max(*v)),
        )
    }

    /// Restoration function keeping points inside the bounding box of the mesh.
    pub fn restore(&self, boundary: Boundary) -> BoxRestore {
        let (lo, hi) = self.bounds();
        BoxRestore::new(lo, hi, boundary, self.dimensionality)
    }

    fn dim(&self) -> usize {
        self.dimensionality.dim()
    }

    fn cell_ijk(&self, cell: usize) -> (usize, usize, usize) {
        let [nx, ny, _] = self.resolution;
        (cell % nx, (cell / nx) % ny, cell / (nx * ny))
    }

    fn cell_id(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.resolution;
        i + nx * (j + ny * k)
    }

    fn vertex_id(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.resolution;
        i + (nx + 1) * (j + (ny + 1) * k)
    }

    fn corners(&self, cell: usize) -> Vec<DVec3> {
        let (i, j, k) = self.cell_ijk(cell);
        (0..1usize << self.dim())
            .map(|a| self.vertices[self.vertex_id(i + (a & 1), j + ((a >> 1) & 1), k + ((a >> 2) & 1))])
            .collect()
    }

    /// Q1 shape function of corner `a` and its reference derivatives.
    fn shape(&self, a: usize, xi: DVec3) -> (f64, DVec3) {
        let dim = self.dim();
        let factor = |d: usize| {
            if (a >> d) & 1 == 1 {
                (xi[d], 1.)
            } else {
                (1. - xi[d], -1.)
            }
        };
        let mut value = 1.;
        let mut gradient = DVec3::ZERO;
        for d in 0..dim {
            let mut g = factor(d).1;
            for e in (0..dim).filter(|&e| e != d) {
                g *= factor(e).0;
            }
            gradient[d] = g;
            value *= factor(d).0;
        }
        (value, gradient)
    }

    fn jacobian(&self, corners: &[DVec3], xi: DVec3) -> DMat3 {
        let mut cols = [DVec3::ZERO; 3];
        for (a, x) in corners.iter().enumerate() {
            let (_, grad) = self.shape(a, xi);
            for (d, col) in cols.iter_mut().enumerate().take(self.dim()) {
                *col += grad[d] * *x;
            }
        }
        if self.dim() == 2 {
            cols[2] = DVec3::Z;
        }
        DMat3::from_cols(cols[0], cols[1], cols[2])
    }

    fn is_local_column(&self, i: usize) -> bool {
        let (i0, i1) = self.local_columns();
        i >= i0 && i < i1
    }

    /// Splits a global lattice index into the cell and the local node index along one direction.
    fn lattice_split(index: usize, degree: usize, cells: usize) -> (usize, usize) {
        let cell = (index / degree).min(cells - 1);
        (cell, index - degree * cell)
    }
}

impl Mesh for StructuredMesh {
    fn dimensionality(&self) -> Dimensionality {
        self.dimensionality
    }

    fn coordinate_version(&self) -> u64 {
        self.version
    }

    fn num_cells(&self) -> usize {
        self.resolution.iter().product()
    }

    fn local_cells(&self) -> Vec<usize> {
        let [_, ny, nz] = self.resolution;
        let (i0, i1) = self.local_columns();
        let mut cells = Vec::with_capacity((i1 - i0) * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in i0..i1 {
                    cells.push(self.cell_id(i, j, k));
                }
            }
        }
        cells
    }

    fn cell_owner(&self, cell: usize) -> usize {
        let (i, _, _) = self.cell_ijk(cell);
        self.partition.partition_point(|&start| start <= i) - 1
    }

    fn cell_neighbours(&self, cell: usize) -> Vec<usize> {
        let (i, j, k) = self.cell_ijk(cell);
        let [nx, ny, nz] = self.resolution;
        let offsets: &[isize] = &[-1, 0, 1];
        let k_offsets: &[isize] = if self.dim() == 3 { offsets } else { &[0] };
        let mut neighbours = vec![];
        for &dk in k_offsets {
            for &dj in offsets {
                for &di in offsets {
                    if di == 0 && dj == 0 && dk == 0 {
                        continue;
                    }
                    let (ni, nj, nk) = (i as isize + di, j as isize + dj, k as isize + dk);
                    if ni < 0 || nj < 0 || nk < 0 {
                        continue;
                    }
                    let (ni, nj, nk) = (ni as usize, nj as usize, nk as usize);
                    if ni >= nx || nj >= ny || nk >= nz {
                        continue;
                    }
                    neighbours.push(self.cell_id(ni, nj, nk));
                }
            }
        }
        neighbours
    }

    fn map_to_physical(&self, cell: usize, reference: DVec3) -> DVec3 {
        self.corners(cell)
            .iter()
            .enumerate()
            .map(|(a, x)| self.shape(a, reference).0 * *x)
            .sum()
    }

    fn reference_coords(&self, cell: usize, point: DVec3) -> Option<DVec3> {
        let dim = self.dim();
        let corners = self.corners(cell);
        let mut xi = DVec3::splat(0.5);
        if dim == 2 {
            xi.z = 0.;
        }
        for _ in 0..NEWTON_MAX_ITER {
            let x: DVec3 = corners
                .iter()
                .enumerate()
                .map(|(a, c)| self.shape(a, xi).0 * *c)
                .sum();
            let mut residual = x - point;
            if dim == 2 {
                residual.z = 0.;
            }
            let jacobian = self.jacobian(&corners, xi);
            if jacobian.determinant().abs() < f64::EPSILON * f64::EPSILON {
                return None;
            }
            let delta = jacobian.inverse() * residual;
            xi -= delta;
            if delta.length() < 1e-14 {
                break;
            }
        }
        let inside = (0..dim).all(|d| xi[d] >= -REFERENCE_TOLERANCE && xi[d] <= 1. + REFERENCE_TOLERANCE);
        inside.then_some(xi)
    }

    fn nodes(&self, key: NodeKey) -> NodeLayout {
        let dim = self.dim();
        let p = key.degree as usize;
        let reference = key.reference_nodes();
        let [nx, ny, nz] = self.resolution;
        let (i0, i1) = self.local_columns();
        let mut coords = vec![];
        let mut owned = vec![];

        if key.continuous {
            let n_i = p * (i1 - i0) + 1;
            let n_j = p * ny + 1;
            let n_k = if dim == 3 { p * nz + 1 } else { 1 };
            for gk in 0..n_k {
                for gj in 0..n_j {
                    for li in 0..n_i {
                        let gi = p * i0 + li;
                        let (ci, a) = Self::lattice_split(gi, p, nx);
                        let (cj, b) = Self::lattice_split(gj, p, ny);
                        let (ck, c) = if dim == 3 { Self::lattice_split(gk, p, nz) } else { (0, 0) };
                        let xi = DVec3::new(
                            reference[a],
                            reference[b],
                            if dim == 3 { reference[c] } else { 0. },
                        );
                        coords.push(self.map_to_physical(self.cell_id(ci, cj, ck), xi));
                        // The left neighbour owns the shared column of nodes
                        owned.push(gi > p * i0 || i0 == 0);
                    }
                }
            }
        } else {
            let n1 = p + 1;
            let n_c = if dim == 3 { n1 } else { 1 };
            for cell in self.local_cells() {
                for c in 0..n_c {
                    for b in 0..n1 {
                        for a in 0..n1 {
                            let xi = DVec3::new(
                                reference[a],
                                reference[b],
                                if dim == 3 { reference[c] } else { 0. },
                            );
                            coords.push(self.map_to_physical(cell, xi));
                            owned.push(true);
                        }
                    }
                }
            }
        }

        NodeLayout {
            key,
            version: self.version,
            coords,
            owned,
        }
    }

    fn interpolate(
        &self,
        key: NodeKey,
        values: &[f64],
        num_components: usize,
        cell: usize,
        reference: DVec3,
    ) -> Option<Vec<f64>> {
        let dim = self.dim();
        let (i, j, k) = self.cell_ijk(cell);
        if !self.is_local_column(i) {
            return None;
        }
        let p = key.degree as usize;
        let n1 = p + 1;
        let nodes = key.reference_nodes();
        let bx = lagrange_basis(&nodes, reference.x);
        let by = lagrange_basis(&nodes, reference.y);
        let bz = if dim == 3 {
            lagrange_basis(&nodes, reference.z)
        } else {
            vec![1.]
        };
        let [_, ny, _] = self.resolution;
        let (i0, i1) = self.local_columns();

        let mut result = vec![0.; num_components];
        for (c, wz) in bz.iter().enumerate() {
            for (b, wy) in by.iter().enumerate() {
                for (a, wx) in bx.iter().enumerate() {
                    let node = if key.continuous {
                        let n_i = p * (i1 - i0) + 1;
                        let n_j = p * ny + 1;
                        (p * (i - i0) + a) + n_i * ((p * j + b) + n_j * (p * k + c))
                    } else {
                        let position = (i - i0) + (i1 - i0) * (j + ny * k);
                        let per_cell = n1.pow(dim as u32);
                        position * per_cell + a + n1 * (b + n1 * c)
                    };
                    let w = wx * wy * wz;
                    let node_values = values.get(node * num_components..(node + 1) * num_components)?;
                    for (r, v) in result.iter_mut().zip(node_values) {
                        *r += w * v;
                    }
                }
            }
        }
        Some(result)
    }

    fn min_radius(&self) -> f64 {
        let dim = self.dim();
        let mut centre = DVec3::splat(0.5);
        if dim == 2 {
            centre.z = 0.;
        }
        self.local_cells()
            .into_iter()
            .map(|cell| {
                let centroid = self.map_to_physical(cell, centre);
                let mut radius = f64::INFINITY;
                for d in 0..dim {
                    for side in [0., 1.] {
                        let mut face = centre;
                        face[d] = side;
                        radius = radius.min(self.map_to_physical(cell, face).distance(centroid));
                    }
                }
                radius
            })
            .fold(f64::INFINITY, f64::min)
    }
}
