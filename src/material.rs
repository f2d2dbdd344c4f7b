use crate::{
    channel::ProxyOptions,
    field::MeshField,
    mesh::{NodeKey, NodeLayout},
    projector::{inverse_distance, ProjectionMap},
};

/// Indicator fields of a categorical particle variable.
///
/// At every node exactly one mask is `1` and all others are `0`. The winning category of a node is
/// the one with the largest inverse distance weight among the particles mapped to it, ties go to
/// the lowest category. Nodes no particle maps to are assigned category `0`, unless the proxy only
/// uses nearest neighbours, in which case every node takes the category of its nearest particle.
/// Particle values outside `0..categories` count as category `0`.
#[derive(Clone, Debug)]
pub struct MaterialMasks {
    options: ProxyOptions,
    key: NodeKey,
    masks: Vec<MeshField>,
    fractions: MeshField,
}

impl MaterialMasks {
    pub(crate) fn new(name: &str, categories: usize, options: ProxyOptions, layout: &NodeLayout) -> Self {
        Self {
            options,
            key: layout.key,
            masks: (0..categories)
                .map(|i| MeshField::new(&format!("{name}_mask_{i}"), 1, layout))
                .collect(),
            fractions: MeshField::new(&format!("{name}_fractions"), categories, layout),
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn options(&self) -> ProxyOptions {
        self.options
    }

    pub fn categories(&self) -> usize {
        self.masks.len()
    }

    pub fn masks(&self) -> &[MeshField] {
        &self.masks
    }

    pub fn mask(&self, category: usize) -> Option<&MeshField> {
        self.masks.get(category)
    }

    /// Weighted share of every category per node (node-major, one component per category).
    pub fn fractions(&self) -> &MeshField {
        &self.fractions
    }

    fn category(&self, value: i64) -> usize {
        if value >= 0 && (value as usize) < self.categories() {
            value as usize
        } else {
            0
        }
    }

    pub(crate) fn update(&mut self, values: &[i64], map: &ProjectionMap, layout: &NodeLayout) {
        let n = self.categories();
        for mask in self.masks.iter_mut() {
            mask.conform(layout);
        }
        self.fractions.conform(layout);
        let num_nodes = layout.len();

        let mut votes = vec![0.; num_nodes * n];
        let mut totals = vec![0.; num_nodes];
        if !self.options.nearest_neighbour_only {
            for (p, (node, distance)) in map.particle_node().iter().enumerate() {
                let w = inverse_distance(*distance);
                votes[node * n + self.category(values[p])] += w;
                totals[*node] += w;
            }
        }
        for node in 0..num_nodes {
            if totals[node] > 0. {
                continue;
            }
            let fallback = if self.options.nearest_neighbour_only {
                map.node_particle()
                    .get(node)
                    .copied()
                    .flatten()
                    .map_or(0, |p| self.category(values[p]))
            } else {
                0
            };
            votes[node * n + fallback] = 1.;
            totals[node] = 1.;
        }

        for node in 0..num_nodes {
            let node_votes = &votes[node * n..(node + 1) * n];
            let mut winner = 0;
            for (i, v) in node_votes.iter().enumerate() {
                if *v > node_votes[winner] {
                    winner = i;
                }
            }
            for (i, mask) in self.masks.iter_mut().enumerate() {
                mask.values_mut()[node] = if i == winner { 1. } else { 0. };
            }
            for (fraction, v) in self.fractions.node_value_mut(node).iter_mut().zip(node_votes) {
                *fraction = v / totals[node];
            }
        }
    }
}
