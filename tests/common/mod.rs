use glam::DVec3;
use pic_swarm::{thread_world, StructuredMesh, Swarm, ThreadComm};

#[allow(unused_macros)]
macro_rules! assert_approx_eq_dvec3 {
    ($a:expr, $b:expr) => {
        float_cmp::assert_approx_eq!(f64, $a.x, $b.x);
        float_cmp::assert_approx_eq!(f64, $a.y, $b.y);
        float_cmp::assert_approx_eq!(f64, $a.z, $b.z);
    };
    ($a:expr, $b:expr, epsilon=$eps:expr) => {
        float_cmp::assert_approx_eq!(f64, $a.x, $b.x, epsilon = $eps);
        float_cmp::assert_approx_eq!(f64, $a.y, $b.y, epsilon = $eps);
        float_cmp::assert_approx_eq!(f64, $a.z, $b.z, epsilon = $eps);
    };
}

/// A `nx x ny` mesh of `[0, nx / ny] x [0, 1]`.
pub fn get_mesh(nx: usize, ny: usize) -> StructuredMesh {
    StructuredMesh::new(
        pic_swarm::Dimensionality::TwoD,
        &[nx, ny],
        DVec3::ZERO,
        DVec3::new(nx as f64 / ny as f64, 1., 0.),
    )
    .expect("Error creating mesh!")
}

/// Run `f` on a swarm per rank of a threaded world of `size` ranks, each owning a slab of `mesh`.
pub fn run_distributed<T, F>(mesh: &StructuredMesh, size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(Swarm<StructuredMesh>) -> T + Sync,
{
    let comms: Vec<ThreadComm> = thread_world(size);
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                let mesh = mesh
                    .clone()
                    .partitioned(rank, size)
                    .expect("Error partitioning mesh!");
                let f = &f;
                s.spawn(move || f(Swarm::new(mesh, comm)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("Rank panicked!"))
            .collect()
    })
}
