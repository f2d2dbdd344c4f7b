//! Reconstruction of nodal mesh fields from scattered particle values.
//!
//! Every particle splats its value onto its nearest node with weight `1 / (eps + distance)`.
//! Nodes that no particle maps to take the value of their nearest particle.

use glam::DVec3;
use tracing::warn;

use crate::{field::MeshField, spatial_index::SpatialIndex};

/// Regularisation of the inverse distance weights of coincident points.
pub const WEIGHT_EPSILON: f64 = 1e-16;

/// Nearest node of every particle and nearest particle of every node.
#[derive(Clone, Debug)]
pub struct ProjectionMap {
    particle_node: Vec<(usize, f64)>,
    node_particle: Vec<Option<usize>>,
}

impl ProjectionMap {
    pub fn build(
        nodes: &[DVec3],
        node_index: &SpatialIndex,
        particles: &[DVec3],
        particle_index: &SpatialIndex,
    ) -> Self {
        let particle_node = node_index
            .nearest_all(particles)
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        // An empty node set leaves nothing to project onto
        let particle_node = if particle_node.len() == particles.len() {
            particle_node
        } else {
            vec![]
        };
        let node_particle = particle_index
            .nearest_all(nodes)
            .into_iter()
            .map(|nearest| nearest.map(|(p, _)| p))
            .collect();
        Self {
            particle_node,
            node_particle,
        }
    }

    pub fn num_particles(&self) -> usize {
        self.particle_node.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.node_particle.len()
    }

    /// Nearest node and distance to it, per particle.
    pub fn particle_node(&self) -> &[(usize, f64)] {
        &self.particle_node
    }

    /// Nearest particle per node, `None` when there are no particles.
    pub fn node_particle(&self) -> &[Option<usize>] {
        &self.node_particle
    }
}

pub fn inverse_distance(distance: f64) -> f64 {
    1. / (WEIGHT_EPSILON + distance)
}

pub struct FieldProjector<'a> {
    map: &'a ProjectionMap,
    nearest_neighbour_only: bool,
}

impl<'a> FieldProjector<'a> {
    pub fn new(map: &'a ProjectionMap, nearest_neighbour_only: bool) -> Self {
        Self {
            map,
            nearest_neighbour_only,
        }
    }

    /// Overwrite `field` with the projection of the row-major particle `values`.
    pub fn project(&self, values: &[f64], field: &mut MeshField) {
        let n = field.num_components();
        let num_nodes = field.num_nodes();
        if self.map.num_particles() == 0 {
            if num_nodes > 0 {
                warn!(
                    field = field.name(),
                    "No local particles to project, filling proxy with zeros"
                );
            }
            field.values_mut().fill(0.);
            return;
        }

        let mut accumulated = vec![0.; num_nodes * n];
        let mut weights = vec![0.; num_nodes];
        let mut single = vec![None; num_nodes];
        let mut counts = vec![0usize; num_nodes];
        if !self.nearest_neighbour_only {
            for (p, (node, distance)) in self.map.particle_node().iter().enumerate() {
                let w = inverse_distance(*distance);
                weights[*node] += w;
                counts[*node] += 1;
                single[*node] = Some(p);
                for c in 0..n {
                    accumulated[*node * n + c] += values[p * n + c] * w;
                }
            }
        }

        let node_particle = self.map.node_particle();
        for node in 0..num_nodes {
            let value = field.node_value_mut(node);
            let source = match (counts[node], single[node]) {
                // A single contributor is its own weighted average
                (1, Some(p)) => Some(p),
                (0, _) => node_particle.get(node).copied().flatten(),
                _ => None,
            };
            match source {
                Some(p) => value.copy_from_slice(&values[p * n..(p + 1) * n]),
                None if weights[node] > 0. => {
                    for c in 0..n {
                        value[c] = accumulated[node * n + c] / weights[node];
                    }
                }
                None => value.fill(0.),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use glam::DVec3;

    use super::*;
    use crate::mesh::{Mesh, NodeKey, StructuredMesh};

    fn setup(particles: &[DVec3]) -> (MeshField, ProjectionMap) {
        let mesh = StructuredMesh::unit_square(2).unwrap();
        let layout = mesh.nodes(NodeKey::new(1, true).unwrap());
        let map = ProjectionMap::build(
            &layout.coords,
            &SpatialIndex::build(&layout.coords),
            particles,
            &SpatialIndex::build(particles),
        );
        (MeshField::new("f", 1, &layout), map)
    }

    #[test]
    fn test_coincident_particle_is_exact() {
        let (mut field, map) = setup(&[DVec3::new(0.5, 0.5, 0.)]);
        FieldProjector::new(&map, false).project(&[0.3], &mut field);
        // node 4 is the centre of the 3x3 lattice
        assert_eq!(field.values()[4], 0.3);
        // every other node falls back to the only particle
        assert!(field.values().iter().all(|v| *v == 0.3));
    }

    #[test]
    fn test_weighted_average() {
        let particles = [DVec3::new(0.1, 0., 0.), DVec3::new(0., 0.2, 0.)];
        let (mut field, map) = setup(&particles);
        FieldProjector::new(&map, false).project(&[1., 4.], &mut field);
        let (w1, w2) = (1. / 0.1, 1. / 0.2);
        assert_approx_eq!(f64, field.values()[0], (w1 + 4. * w2) / (w1 + w2), epsilon = 1e-12);
        assert!(map.particle_node().iter().all(|(node, _)| *node == 0));

        FieldProjector::new(&map, true).project(&[1., 4.], &mut field);
        assert_eq!(field.values()[0], 1.);
        assert_eq!(field.values()[6], 4.);
    }

    #[test]
    fn test_no_particles() {
        let (mut field, map) = setup(&[]);
        field.values_mut().fill(2.);
        FieldProjector::new(&map, false).project(&[], &mut field);
        assert!(field.values().iter().all(|v| *v == 0.));
    }
}
