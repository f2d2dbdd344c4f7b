use glam::DVec3;

use crate::{
    advection::VelocityField,
    cell_locator::CellLocator,
    comm::{Communicator, ReduceOp},
    errors::{ConfigError, LocationError, SwarmError},
    mesh::{Mesh, NodeKey, NodeLayout},
};

/// Node-major values of a discretisation on the local part of a mesh.
#[derive(Clone, Debug)]
pub struct MeshField {
    name: String,
    key: NodeKey,
    num_components: usize,
    values: Vec<f64>,
    /// Coordinate version of the layout the values belong to
    version: u64,
}

impl MeshField {
    pub fn new(name: &str, num_components: usize, layout: &NodeLayout) -> Self {
        Self {
            name: name.to_string(),
            key: layout.key,
            num_components,
            values: vec![0.; layout.len() * num_components],
            version: layout.version,
        }
    }

    /// A field with values given by `f` at every node of `layout`.
    pub fn from_fn(
        name: &str,
        num_components: usize,
        layout: &NodeLayout,
        f: impl Fn(DVec3) -> Vec<f64>,
    ) -> Result<Self, ConfigError> {
        let mut field = Self::new(name, num_components, layout);
        for (node, x) in layout.coords.iter().enumerate() {
            let value = f(*x);
            if value.len() != num_components {
                return Err(ConfigError::ComponentMismatch {
                    name: name.to_string(),
                    expected: num_components,
                    found: value.len(),
                });
            }
            field.node_value_mut(node).copy_from_slice(&value);
        }
        Ok(field)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn num_nodes(&self) -> usize {
        self.values.len() / self.num_components
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn node_value(&self, node: usize) -> &[f64] {
        &self.values[node * self.num_components..(node + 1) * self.num_components]
    }

    pub fn node_value_mut(&mut self, node: usize) -> &mut [f64] {
        &mut self.values[node * self.num_components..(node + 1) * self.num_components]
    }

    /// Reset to zeros when `layout` differs from the one the values were computed on.
    pub(crate) fn conform(&mut self, layout: &NodeLayout) {
        let len = layout.len() * self.num_components;
        if self.version != layout.version || self.values.len() != len {
            self.values.clear();
            self.values.resize(len, 0.);
            self.version = layout.version;
        }
    }

    /// Global statistics of a scalar field over the nodes flagged in `owned`.
    pub fn stats(&self, owned: &[bool], comm: &dyn Communicator) -> Result<FieldStats, ConfigError> {
        if self.num_components != 1 {
            return Err(ConfigError::ComponentMismatch {
                name: self.name.clone(),
                expected: 1,
                found: self.num_components,
            });
        }
        let owned_values = || {
            self.values
                .iter()
                .zip(owned.iter())
                .filter(|(_, o)| **o)
                .map(|(v, _)| *v)
        };
        let size = comm.all_reduce(owned_values().count() as f64, ReduceOp::Sum);
        let sum = comm.all_reduce(owned_values().sum(), ReduceOp::Sum);
        let sum_sq = comm.all_reduce(owned_values().map(|v| v * v).sum(), ReduceOp::Sum);
        let min = comm.all_reduce(owned_values().fold(f64::INFINITY, f64::min), ReduceOp::Min);
        let max = comm.all_reduce(owned_values().fold(f64::NEG_INFINITY, f64::max), ReduceOp::Max);
        let (mean, rms) = if size > 0. {
            (sum / size, (sum_sq / size).sqrt())
        } else {
            (0., 0.)
        };
        Ok(FieldStats {
            size: size as usize,
            mean,
            min,
            max,
            sum,
            norm2: sum_sq.sqrt(),
            rms,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldStats {
    pub size: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub norm2: f64,
    pub rms: f64,
}

/// A nodal field that can be evaluated anywhere inside the local part of its mesh.
pub struct NodalFunction<M: Mesh> {
    mesh: M,
    locator: CellLocator,
    field: MeshField,
}

impl<M: Mesh> NodalFunction<M> {
    pub fn new(mesh: M, field: MeshField) -> Self {
        let locator = CellLocator::build(&mesh);
        Self {
            mesh,
            locator,
            field,
        }
    }

    pub fn field(&self) -> &MeshField {
        &self.field
    }

    pub fn evaluate_at(&self, point: DVec3) -> Result<Vec<f64>, SwarmError> {
        let cell = self.locator.locate(&self.mesh, point)?;
        let not_local = || LocationError::NotLocal {
            point,
            cell,
            owner: self.mesh.cell_owner(cell),
        };
        let reference = self
            .mesh
            .reference_coords(cell, point)
            .ok_or_else(not_local)?;
        let value = self
            .mesh
            .interpolate(
                self.field.key,
                &self.field.values,
                self.field.num_components,
                cell,
                reference,
            )
            .ok_or_else(not_local)?;
        Ok(value)
    }
}

impl<M: Mesh> VelocityField for NodalFunction<M> {
    fn evaluate(&self, points: &[DVec3]) -> Result<Vec<DVec3>, SwarmError> {
        let dim = self.mesh.dimensionality().dim();
        if self.field.num_components != dim {
            return Err(ConfigError::ComponentMismatch {
                name: self.field.name.clone(),
                expected: dim,
                found: self.field.num_components,
            }
            .into());
        }
        points
            .iter()
            .map(|p| {
                let value = self.evaluate_at(*p)?;
                let mut v = DVec3::ZERO;
                for (i, c) in value.iter().enumerate() {
                    v[i] = *c;
                }
                Ok(v)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use glam::DVec3;

    use super::*;
    use crate::{comm::SingleProcess, mesh::StructuredMesh};

    #[test]
    fn test_stats() {
        let mesh = StructuredMesh::unit_square(2).unwrap();
        let layout = mesh.nodes(NodeKey::new(1, true).unwrap());
        let field = MeshField::from_fn("x", 1, &layout, |x| vec![x.x]).unwrap();
        let stats = field.stats(&layout.owned, &SingleProcess).unwrap();
        assert_eq!(stats.size, 9);
        assert_approx_eq!(f64, stats.sum, 4.5);
        assert_approx_eq!(f64, stats.mean, 0.5);
        assert_approx_eq!(f64, stats.min, 0.);
        assert_approx_eq!(f64, stats.max, 1.);
        assert_approx_eq!(f64, stats.norm2, 3.75f64.sqrt());

        let vector = MeshField::new("v", 2, &layout);
        assert!(vector.stats(&layout.owned, &SingleProcess).is_err());
    }

    #[test]
    fn test_nodal_function() {
        let mesh = StructuredMesh::unit_square(3).unwrap();
        let layout = mesh.nodes(NodeKey::new(2, true).unwrap());
        let field = MeshField::from_fn("v", 2, &layout, |x| vec![-x.y, x.x]).unwrap();
        let function = NodalFunction::new(mesh, field);
        let v = function
            .evaluate(&[DVec3::new(0.3, 0.6, 0.), DVec3::new(1., 1., 0.)])
            .unwrap();
        assert_approx_eq!(f64, v[0].x, -0.6, epsilon = 1e-12);
        assert_approx_eq!(f64, v[0].y, 0.3, epsilon = 1e-12);
        assert_approx_eq!(f64, v[1].x, -1., epsilon = 1e-12);
        assert!(function.evaluate(&[DVec3::new(2., 0., 0.)]).is_err());
    }
}
