//! Collective communication between the processes of a domain decomposition.
//!
//! Each process owns its swarm exclusively, the only cross-process effects are the collectives
//! below. Every rank must call them in the same order.

use std::sync::{Arc, Barrier, Mutex, MutexGuard};

#[cfg(feature = "mpi")]
mod mpi_comm;

#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

/// Particle rows sent to one destination rank.
///
/// For every particle, all float channel values followed by all int channel values, in channel
/// registration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MigrationPacket {
    pub floats: Vec<f64>,
    pub ints: Vec<i64>,
    pub count: usize,
}

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Combine `value` over all ranks. Blocks until every rank has contributed.
    fn all_reduce(&self, value: f64, op: ReduceOp) -> f64;

    /// Send `outgoing[dst]` to every rank `dst`, returns the packets received, indexed by source.
    fn all_to_all(&self, outgoing: Vec<MigrationPacket>) -> Vec<MigrationPacket>;
}

/// The trivial communicator of a serial run.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce(&self, value: f64, _op: ReduceOp) -> f64 {
        value
    }

    fn all_to_all(&self, outgoing: Vec<MigrationPacket>) -> Vec<MigrationPacket> {
        outgoing
    }
}

struct World {
    size: usize,
    barrier: Barrier,
    /// Slot `dst * size + src`
    mailbox: Mutex<Vec<Option<MigrationPacket>>>,
    reductions: Mutex<Vec<f64>>,
}

impl World {
    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        // A poisoned lock means a peer panicked, the data itself is still consistent.
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One rank of an in-memory world whose ranks run on separate threads.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    world: Arc<World>,
}

/// Creates the communicators of a world of `size` ranks, to be moved to one thread each.
pub fn thread_world(size: usize) -> Vec<ThreadComm> {
    let world = Arc::new(World {
        size,
        barrier: Barrier::new(size),
        mailbox: Mutex::new(vec![None; size * size]),
        reductions: Mutex::new(vec![0.; size]),
    });
    (0..size)
        .map(|rank| ThreadComm {
            rank,
            world: Arc::clone(&world),
        })
        .collect()
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.size
    }

    fn all_reduce(&self, value: f64, op: ReduceOp) -> f64 {
        World::lock(&self.world.reductions)[self.rank] = value;
        self.world.barrier.wait();
        let result = {
            let values = World::lock(&self.world.reductions);
            values[1..].iter().fold(values[0], |acc, v| op.apply(acc, *v))
        };
        // Nobody may overwrite its slot before everyone has read
        self.world.barrier.wait();
        result
    }

    fn all_to_all(&self, outgoing: Vec<MigrationPacket>) -> Vec<MigrationPacket> {
        let size = self.world.size;
        {
            let mut mailbox = World::lock(&self.world.mailbox);
            for (dst, packet) in outgoing.into_iter().enumerate().take(size) {
                mailbox[dst * size + self.rank] = Some(packet);
            }
        }
        self.world.barrier.wait();
        let received = {
            let mut mailbox = World::lock(&self.world.mailbox);
            (0..size)
                .map(|src| mailbox[self.rank * size + src].take().unwrap_or_default())
                .collect()
        };
        self.world.barrier.wait();
        received
    }
}
