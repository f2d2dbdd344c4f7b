use glam::DVec3;
use pic_swarm::{
    AdvectionOptions, Boundary, Communicator, DataType, Dimensionality, FillLayout, LocationError,
    Mesh, ProxyOptions, ReduceOp, StructuredMesh, SwarmError, VarId,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[macro_use]
mod common;

use common::{get_mesh, run_distributed};

#[test]
fn test_boundary_points_go_to_lowest_rank() {
    let results = run_distributed(&get_mesh(2, 2), 2, |mut swarm| {
        let rank = swarm.comm().rank();
        let coords = if rank == 1 {
            vec![DVec3::new(0.5, 0.25, 0.), DVec3::new(0.75, 0.25, 0.)]
        } else {
            vec![]
        };
        swarm.add_particles(&coords).unwrap();
        let access = swarm.access(&[]).unwrap();
        let cells = access.int_data(VarId::CELL_ID).unwrap().to_vec();
        let positions = access.positions();
        access.commit().unwrap();
        (rank, cells, positions)
    });

    for (rank, cells, positions) in results {
        assert_eq!(cells.len(), 1);
        if rank == 0 {
            assert_eq!(cells, vec![0]);
            assert_approx_eq_dvec3!(positions[0], DVec3::new(0.5, 0.25, 0.));
        } else {
            assert_eq!(cells, vec![1]);
            assert_approx_eq_dvec3!(positions[0], DVec3::new(0.75, 0.25, 0.));
        }
    }
}

#[test]
fn test_advection_conserves_particles() {
    let results = run_distributed(&get_mesh(6, 3), 3, |mut swarm| {
        let rank = swarm.comm().rank();
        let tag = swarm.add_variable("tag", 1, DataType::Float, None).unwrap();
        let material = swarm
            .add_index_variable("material", 2, ProxyOptions::default())
            .unwrap();
        swarm.populate(FillLayout::Gauss, 2).unwrap();
        assert_eq!(swarm.num_particles(), 24);

        let mut access = swarm.access(&[tag, material]).unwrap();
        for (i, t) in access.data_mut(tag).unwrap().iter_mut().enumerate() {
            *t = (1000 * rank + i) as f64;
        }
        access.int_data_mut(material).unwrap().fill(rank as i64);
        access.commit().unwrap();
        let tag_sum = swarm.comm().all_reduce(
            (0..24).map(|i| (1000 * rank + i) as f64).sum(),
            ReduceOp::Sum,
        );

        let restore = swarm.mesh().restore(Boundary::Periodic);
        let velocity = |_: DVec3| DVec3::new(0.7, 0.2, 0.);
        for _ in 0..5 {
            swarm
                .advect(&velocity, 0.1, AdvectionOptions::default(), Some(&restore))
                .unwrap();
            assert_eq!(swarm.global_num_particles(), 72);
        }

        let local_cells = swarm.mesh().local_cells();
        let access = swarm.access(&[]).unwrap();
        let cells = access.int_data(VarId::CELL_ID).unwrap().to_vec();
        let tags = access.data(tag).unwrap().to_vec();
        let materials = access.int_data(material).unwrap().to_vec();
        access.commit().unwrap();

        let all_local = cells.iter().all(|c| local_cells.contains(&(*c as usize)));
        let foreign = tags
            .iter()
            .zip(materials.iter())
            .filter(|(t, m)| {
                // Every particle keeps its own data while migrating
                assert_eq!(**t as usize / 1000, **m as usize);
                **t as usize / 1000 != rank
            })
            .count();
        let global_foreign = swarm.comm().all_reduce(foreign as f64, ReduceOp::Sum);
        let global_tags = swarm
            .comm()
            .all_reduce(tags.iter().sum::<f64>(), ReduceOp::Sum);
        (all_local, global_foreign, global_tags, tag_sum)
    });

    for (all_local, global_foreign, global_tags, tag_sum) in results {
        assert!(all_local);
        assert!(global_foreign > 0.);
        assert_eq!(global_tags, tag_sum);
    }
}

#[test]
fn test_random_particles_in_3d_box() {
    let mesh = StructuredMesh::new(
        Dimensionality::ThreeD,
        &[4, 2, 2],
        DVec3::ZERO,
        DVec3::new(2., 1., 1.),
    )
    .unwrap();
    let results = run_distributed(&mesh, 2, |mut swarm| {
        let rank = swarm.comm().rank();
        let tag = swarm.add_variable("tag", 1, DataType::Float, None).unwrap();
        let height = swarm
            .add_variable("height", 1, DataType::Float, Some(ProxyOptions::default()))
            .unwrap();
        swarm.populate(FillLayout::Gauss, 2).unwrap();
        assert_eq!(swarm.num_particles(), 64);

        // Scattered over the whole box, so they land on either rank
        let mut rng = StdRng::seed_from_u64(rank as u64);
        let extra: Vec<_> = (0..40)
            .map(|_| DVec3::new(rng.gen_range(0. ..2.), rng.gen::<f64>(), rng.gen::<f64>()))
            .collect();
        swarm.add_particles(&extra).unwrap();
        assert_eq!(swarm.global_num_particles(), 208);

        let heights: Vec<_> = swarm.positions().iter().map(|p| p.z).collect();
        let mut access = swarm.access(&[tag, height]).unwrap();
        for (i, t) in access.data_mut(tag).unwrap().iter_mut().enumerate() {
            *t = (1000 * rank + i) as f64;
        }
        access.data_mut(height).unwrap().copy_from_slice(&heights);
        access.commit().unwrap();
        let tag_sum = swarm.comm().all_reduce(
            (0..swarm.num_particles()).map(|i| (1000 * rank + i) as f64).sum(),
            ReduceOp::Sum,
        );

        let restore = swarm.mesh().restore(Boundary::Periodic);
        let velocity = |p: DVec3| DVec3::new(0.6, -0.4 * p.z, 0.5);
        let options = AdvectionOptions {
            corrector: true,
            ..Default::default()
        };
        for _ in 0..4 {
            swarm.advect(&velocity, 0.2, options, Some(&restore)).unwrap();
            assert_eq!(swarm.global_num_particles(), 208);
        }

        let local_cells = swarm.mesh().local_cells();
        let access = swarm.access(&[]).unwrap();
        let cells = access.int_data(VarId::CELL_ID).unwrap().to_vec();
        let positions = access.positions();
        let tags = access.data(tag).unwrap().to_vec();
        access.commit().unwrap();

        let all_local = cells.iter().all(|c| local_cells.contains(&(*c as usize)));
        let inside = positions.iter().all(|p| {
            (0. ..=2.).contains(&p.x) && (0. ..=1.).contains(&p.y) && (0. ..=1.).contains(&p.z)
        });
        let foreign = tags.iter().filter(|t| **t as usize / 1000 != rank).count();
        let global_foreign = swarm.comm().all_reduce(foreign as f64, ReduceOp::Sum);
        let global_tags = swarm
            .comm()
            .all_reduce(tags.iter().sum::<f64>(), ReduceOp::Sum);
        let proxy = swarm.proxy(height).unwrap().unwrap();
        let bounded = proxy.values().iter().all(|v| (0. ..=1.).contains(v));
        (all_local && inside && bounded, global_foreign, global_tags, tag_sum)
    });

    for (valid, global_foreign, global_tags, tag_sum) in results {
        assert!(valid);
        assert!(global_foreign > 0.);
        assert_eq!(global_tags, tag_sum);
    }
}

#[test]
fn test_lost_particle_fails_every_rank() {
    let results = run_distributed(&get_mesh(2, 2), 2, |mut swarm| {
        let rank = swarm.comm().rank();
        let coords = if rank == 0 {
            vec![DVec3::new(5., 5., 0.)]
        } else {
            vec![]
        };
        (rank, swarm.add_particles(&coords))
    });

    for (rank, result) in results {
        match (rank, result) {
            (0, Err(SwarmError::Location(LocationError::OutsideDomain { .. }))) => (),
            (1, Err(SwarmError::Location(LocationError::RemoteFailure { count }))) => {
                assert_eq!(count, 1)
            }
            (rank, result) => panic!("Unexpected result on rank {rank}: {result:?}"),
        }
    }
}
