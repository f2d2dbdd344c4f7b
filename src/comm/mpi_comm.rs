use mpi::{
    collective::SystemOperation,
    datatype::{Partition, PartitionMut},
    environment::Universe,
    topology::SimpleCommunicator,
    traits::*,
    Count,
};

use super::{Communicator, MigrationPacket, ReduceOp};

/// One process of an MPI world.
///
/// Collectives run on `MPI_COMM_WORLD`. MPI is initialised with the default threading level, so
/// every rank must issue its collectives from the thread that created the [`Universe`].
#[derive(Clone, Copy, Debug)]
pub struct MpiComm {
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// The communicator of this process, `universe` must outlive every swarm using it.
    pub fn new(universe: &Universe) -> Self {
        let world = universe.world();
        Self {
            rank: world.rank() as usize,
            size: world.size() as usize,
        }
    }

    fn world() -> SimpleCommunicator {
        SimpleCommunicator::world()
    }
}

/// Offsets of consecutive blocks of the given lengths.
fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |offset, count| {
            let displ = *offset;
            *offset += count;
            Some(displ)
        })
        .collect()
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce(&self, value: f64, op: ReduceOp) -> f64 {
        let op = match op {
            ReduceOp::Sum => SystemOperation::sum(),
            ReduceOp::Min => SystemOperation::min(),
            ReduceOp::Max => SystemOperation::max(),
        };
        let mut result = 0.;
        Self::world().all_reduce_into(&value, &mut result, op);
        result
    }

    fn all_to_all(&self, mut outgoing: Vec<MigrationPacket>) -> Vec<MigrationPacket> {
        let world = Self::world();
        outgoing.resize_with(self.size, Default::default);

        // Per destination: particles, floats, ints
        let send_sizes: Vec<Count> = outgoing
            .iter()
            .flat_map(|p| [p.count as Count, p.floats.len() as Count, p.ints.len() as Count])
            .collect();
        let mut recv_sizes = vec![0 as Count; 3 * self.size];
        world.all_to_all_into(&send_sizes[..], &mut recv_sizes[..]);

        let column = |sizes: &[Count], i: usize| -> Vec<Count> {
            sizes.chunks_exact(3).map(|c| c[i]).collect()
        };
        let floats: Vec<f64> = outgoing.iter().flat_map(|p| p.floats.iter().copied()).collect();
        let ints: Vec<i64> = outgoing.iter().flat_map(|p| p.ints.iter().copied()).collect();

        let (send_floats, recv_floats) = (column(&send_sizes, 1), column(&recv_sizes, 1));
        let mut floats_in = vec![0.; recv_floats.iter().sum::<Count>() as usize];
        {
            let send_displs = displacements(&send_floats);
            let recv_displs = displacements(&recv_floats);
            let send = Partition::new(&floats[..], &send_floats[..], &send_displs[..]);
            let mut recv = PartitionMut::new(&mut floats_in[..], &recv_floats[..], &recv_displs[..]);
            world.all_to_all_varcount_into(&send, &mut recv);
        }

        let (send_ints, recv_ints) = (column(&send_sizes, 2), column(&recv_sizes, 2));
        let mut ints_in = vec![0i64; recv_ints.iter().sum::<Count>() as usize];
        {
            let send_displs = displacements(&send_ints);
            let recv_displs = displacements(&recv_ints);
            let send = Partition::new(&ints[..], &send_ints[..], &send_displs[..]);
            let mut recv = PartitionMut::new(&mut ints_in[..], &recv_ints[..], &recv_displs[..]);
            world.all_to_all_varcount_into(&send, &mut recv);
        }

        let mut floats_in = floats_in.into_iter();
        let mut ints_in = ints_in.into_iter();
        column(&recv_sizes, 0)
            .into_iter()
            .zip(recv_floats.iter().zip(recv_ints.iter()))
            .map(|(count, (n_floats, n_ints))| MigrationPacket {
                floats: floats_in.by_ref().take(*n_floats as usize).collect(),
                ints: ints_in.by_ref().take(*n_ints as usize).collect(),
                count: count as usize,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // MPI can be initialised once per process, so everything runs in a single test.
    #[test]
    fn test_mpi_world() {
        let universe = mpi::initialize().unwrap();
        let comm = MpiComm::new(&universe);
        let rank = comm.rank() as f64;
        let size = comm.size() as f64;
        assert_eq!(comm.all_reduce(rank + 1., ReduceOp::Sum), size * (size + 1.) / 2.);
        assert_eq!(comm.all_reduce(rank, ReduceOp::Min), 0.);
        assert_eq!(comm.all_reduce(rank, ReduceOp::Max), size - 1.);

        let outgoing = (0..comm.size())
            .map(|dst| MigrationPacket {
                floats: vec![rank; 2 * dst],
                ints: vec![comm.rank() as i64; dst],
                count: dst,
            })
            .collect();
        let received = comm.all_to_all(outgoing);
        assert_eq!(received.len(), comm.size());
        for (src, packet) in received.iter().enumerate() {
            assert_eq!(packet.count, comm.rank());
            assert_eq!(packet.floats, vec![src as f64; 2 * comm.rank()]);
            assert_eq!(packet.ints, vec![src as i64; comm.rank()]);
        }
    }

    #[test]
    fn test_displacements() {
        assert_eq!(displacements(&[2, 0, 3, 1]), vec![0, 2, 2, 5]);
        assert!(displacements(&[]).is_empty());
    }
}
