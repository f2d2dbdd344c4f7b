use glam::DVec3;
use rayon::prelude::*;
use rstar::{primitives::GeomWithData, PointDistance, RTree};

type TreeNode = GeomWithData<[f64; 3], usize>;

/// Immutable nearest neighbour search structure over a snapshot of points.
///
/// The index never tracks changes to the points it was built from, owners drop and rebuild it
/// whenever the underlying point set changes.
pub struct SpatialIndex {
    tree: RTree<TreeNode>,
    len: usize,
}

impl SpatialIndex {
    pub fn build(points: &[DVec3]) -> Self {
        let tree_objects = points
            .iter()
            .enumerate()
            .map(|(i, point)| TreeNode::new(point.to_array(), i))
            .collect();
        Self {
            tree: RTree::bulk_load(tree_objects),
            len: points.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of and distance to the point closest to `point`.
    ///
    /// Points at exactly the same distance are resolved in favour of the lowest index, so repeated
    /// queries are deterministic regardless of the tree layout.
    pub fn nearest(&self, point: DVec3) -> Option<(usize, f64)> {
        let query = point.to_array();
        let first = self.tree.nearest_neighbor(&query)?;
        let d2 = first.distance_2(&query);
        let radius = d2 * (1. + 1e-12) + f64::MIN_POSITIVE;
        let idx = self
            .tree
            .locate_within_distance(query, radius)
            .filter(|node| node.distance_2(&query) <= d2)
            .map(|node| node.data)
            .min()
            .unwrap_or(first.data);
        Some((idx, d2.sqrt()))
    }

    /// Run [`SpatialIndex::nearest`] for every point, preserving order.
    pub fn nearest_all(&self, points: &[DVec3]) -> Vec<Option<(usize, f64)>> {
        points.par_iter().map(|p| self.nearest(*p)).collect()
    }
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use glam::DVec3;

    use super::SpatialIndex;

    #[test]
    fn test_nearest() {
        let points = [
            DVec3::new(0., 0., 0.),
            DVec3::new(1., 0., 0.),
            DVec3::new(0., 1., 0.),
        ];
        let index = SpatialIndex::build(&points);
        assert_eq!(index.len(), 3);

        let (idx, dist) = index.nearest(DVec3::new(0.9, 0.2, 0.)).unwrap();
        assert_eq!(idx, 1);
        assert_approx_eq!(f64, dist, (0.01f64 + 0.04).sqrt());

        let (idx, dist) = index.nearest(points[2]).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(dist, 0.);
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let points = [
            DVec3::new(1., 0., 0.),
            DVec3::new(-1., 0., 0.),
            DVec3::new(0., 1., 0.),
            DVec3::new(1., 0., 0.),
        ];
        let index = SpatialIndex::build(&points);
        let (idx, _) = index.nearest(DVec3::ZERO).unwrap();
        assert_eq!(idx, 0);
        let (idx, _) = index.nearest(DVec3::new(1., 0., 0.)).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_empty_and_batched() {
        let empty = SpatialIndex::build(&[]);
        assert!(empty.is_empty());
        assert!(empty.nearest(DVec3::ZERO).is_none());

        let points: Vec<_> = (0..10).map(|i| DVec3::new(i as f64, 0., 0.)).collect();
        let index = SpatialIndex::build(&points);
        let found = index.nearest_all(&[DVec3::new(4.4, 0., 0.), DVec3::new(-3., 0., 0.)]);
        assert_eq!(found[0].map(|(i, _)| i), Some(4));
        assert_eq!(found[1].map(|(i, _)| i), Some(0));
    }
}
