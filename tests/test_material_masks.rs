use float_cmp::assert_approx_eq;
use glam::DVec3;
use pic_swarm::{
    AdvectionOptions, Boundary, Communicator, FillLayout, Mesh, ProxyOptions, Swarm,
};

#[macro_use]
mod common;

use common::{get_mesh, run_distributed};

#[test]
fn test_single_particle_material() {
    let mut swarm = Swarm::serial(get_mesh(4, 4));
    let material = swarm
        .add_index_variable("material", 2, ProxyOptions::default())
        .unwrap();
    swarm.add_particles(&[DVec3::new(0.5, 0.5, 0.)]).unwrap();

    let mut access = swarm.access(&[material]).unwrap();
    access.int_data_mut(material).unwrap()[0] = 1;
    access.commit().unwrap();

    let masks = swarm.masks(material).unwrap().unwrap();
    assert_eq!(masks.categories(), 2);
    let layout = swarm.mesh().nodes(masks.key());
    assert_eq!(layout.len(), 25);
    let node_at = |p: DVec3| {
        layout
            .coords
            .iter()
            .position(|x| x.distance(p) < 1e-12)
            .unwrap()
    };
    let centre = node_at(DVec3::new(0.5, 0.5, 0.));
    let corner = node_at(DVec3::ZERO);
    assert_eq!(masks.mask(1).unwrap().values()[centre], 1.);
    assert_eq!(masks.mask(0).unwrap().values()[centre], 0.);
    assert_eq!(masks.mask(0).unwrap().values()[corner], 1.);
    assert_eq!(masks.mask(1).unwrap().values()[corner], 0.);

    // Exactly one mask is set at every node
    for node in 0..layout.len() {
        let values: Vec<f64> = masks.masks().iter().map(|m| m.values()[node]).collect();
        assert!(values.iter().all(|v| *v == 0. || *v == 1.));
        assert_approx_eq!(f64, values.iter().sum::<f64>(), 1.);
        assert_approx_eq!(f64, values[0] * values[1], 0.);
        assert_approx_eq!(f64, masks.fractions().node_value(node).iter().sum::<f64>(), 1.);
    }
    let set: f64 = masks.mask(1).unwrap().values().iter().sum();
    assert_eq!(set, 1.);
}

#[test]
fn test_masks_track_advected_material() {
    let mut swarm = Swarm::serial(get_mesh(4, 4));
    let material = swarm
        .add_index_variable("material", 2, ProxyOptions::default())
        .unwrap();
    swarm.populate(FillLayout::Gauss, 2).unwrap();

    let mut access = swarm.access(&[material]).unwrap();
    let positions = access.positions();
    for (m, x) in access.int_data_mut(material).unwrap().iter_mut().zip(positions) {
        if x.x < 0.5 {
            *m = 1;
        }
    }
    access.commit().unwrap();
    let before = swarm.masks(material).unwrap().unwrap().mask(1).unwrap().values().to_vec();

    // Shift everything by one column: the material boundary moves with the particles
    let restore = swarm.mesh().restore(Boundary::Periodic);
    swarm
        .advect(
            &|_: DVec3| DVec3::new(0.25, 0., 0.),
            1.,
            AdvectionOptions::default(),
            Some(&restore),
        )
        .unwrap();
    assert_eq!(swarm.global_num_particles(), 64);
    let masks = swarm.masks(material).unwrap().unwrap();
    let after = masks.mask(1).unwrap().values();
    let layout = swarm.mesh().nodes(masks.key());
    for (node, x) in layout.coords.iter().enumerate() {
        if x.x < 1e-12 {
            assert_eq!(before[node], 1.);
            assert_eq!(after[node], 0.);
        }
        if (x.x - 0.5).abs() < 1e-12 {
            assert_eq!(after[node], 1.);
        }
    }
}

#[test]
fn test_rank_without_particles_defaults_to_first_category() {
    let results = run_distributed(&get_mesh(2, 2), 2, |mut swarm| {
        let material = swarm
            .add_index_variable("material", 2, ProxyOptions::default())
            .unwrap();
        let rank = swarm.comm().rank();
        let coords = if rank == 0 {
            vec![DVec3::new(0.2, 0.5, 0.)]
        } else {
            vec![]
        };
        swarm.add_particles(&coords).unwrap();

        let mut access = swarm.access(&[material]).unwrap();
        access.int_data_mut(material).unwrap().fill(1);
        access.commit().unwrap();

        let masks = swarm.masks(material).unwrap().unwrap();
        let owned = swarm.mesh().nodes(masks.key()).owned;
        let stats = masks.mask(1).unwrap().stats(&owned, swarm.comm()).unwrap();
        (
            rank,
            swarm.num_particles(),
            masks.mask(0).unwrap().values().to_vec(),
            masks.mask(1).unwrap().values().to_vec(),
            stats,
        )
    });

    for (rank, num_particles, mask_0, mask_1, stats) in results {
        if rank == 0 {
            assert_eq!(num_particles, 1);
            // Only the node at (0, 0.5) receives the particle
            assert_eq!(mask_1, vec![0., 0., 1., 0., 0., 0.]);
            assert_eq!(mask_0, vec![1., 1., 0., 1., 1., 1.]);
        } else {
            assert_eq!(num_particles, 0);
            assert!(mask_0.iter().all(|v| *v == 1.));
            assert!(mask_1.iter().all(|v| *v == 0.));
        }
        // The shared column of nodes is owned by the first rank
        assert_eq!(stats.size, 9);
        assert_approx_eq!(f64, stats.sum, 1.);
        assert_approx_eq!(f64, stats.mean, 1. / 9.);
    }
}
