use glam::DVec3;
use tracing::error;

use crate::{
    channel::{ChannelData, DataType, VarId},
    errors::{StateError, SwarmError},
    mesh::Mesh,
    swarm::Swarm,
};

/// Scoped read/write access to the particle data of a swarm.
///
/// Every variable can be read, only the variables named when opening the scope can be written.
/// Closing the outermost scope commits: when the positions were writable the particles are
/// relocated and migrated and every proxy is refreshed, otherwise only the proxies of the written
/// variables are. The commit runs on [`Access::commit`] or, failing that, when the guard is
/// dropped.
pub struct Access<'a, M: Mesh> {
    swarm: &'a mut Swarm<M>,
    closed: bool,
}

impl<'a, M: Mesh> Access<'a, M> {
    pub(crate) fn new(swarm: &'a mut Swarm<M>) -> Self {
        Self {
            swarm,
            closed: false,
        }
    }

    pub fn num_particles(&self) -> usize {
        self.swarm.num_particles()
    }

    pub fn is_writable(&self, var: VarId) -> bool {
        self.swarm.is_writable(var)
    }

    pub fn data(&self, var: VarId) -> Result<&[f64], StateError> {
        let channel = self.swarm.channel(var)?;
        match self.swarm.data(var)? {
            ChannelData::Float(values) => Ok(values.as_slice()),
            ChannelData::Int(_) => Err(StateError::TypeMismatch {
                name: channel.name().to_string(),
                expected: DataType::Float,
                found: DataType::Int,
            }),
        }
    }

    pub fn int_data(&self, var: VarId) -> Result<&[i64], StateError> {
        let channel = self.swarm.channel(var)?;
        match self.swarm.data(var)? {
            ChannelData::Int(values) => Ok(values.as_slice()),
            ChannelData::Float(_) => Err(StateError::TypeMismatch {
                name: channel.name().to_string(),
                expected: DataType::Int,
                found: DataType::Float,
            }),
        }
    }

    fn writable_data(&mut self, var: VarId) -> Result<&mut ChannelData, StateError> {
        let writable = self.swarm.is_writable(var);
        let channel = self.swarm.channel_mut(var)?;
        if !writable {
            return Err(StateError::NotWritable(channel.name.clone()));
        }
        Ok(&mut channel.data)
    }

    pub fn data_mut(&mut self, var: VarId) -> Result<&mut [f64], StateError> {
        let name = self.swarm.channel(var)?.name().to_string();
        match self.writable_data(var)? {
            ChannelData::Float(values) => Ok(values.as_mut_slice()),
            ChannelData::Int(_) => Err(StateError::TypeMismatch {
                name,
                expected: DataType::Float,
                found: DataType::Int,
            }),
        }
    }

    pub fn int_data_mut(&mut self, var: VarId) -> Result<&mut [i64], StateError> {
        let name = self.swarm.channel(var)?.name().to_string();
        match self.writable_data(var)? {
            ChannelData::Int(values) => Ok(values.as_mut_slice()),
            ChannelData::Float(_) => Err(StateError::TypeMismatch {
                name,
                expected: DataType::Int,
                found: DataType::Float,
            }),
        }
    }

    pub fn positions(&self) -> Vec<DVec3> {
        self.swarm.positions()
    }

    /// Overwrite the positions of all particles.
    pub fn set_positions(&mut self, positions: &[DVec3]) -> Result<(), StateError> {
        self.set_points(VarId::COORDINATES, positions)
    }

    /// Overwrite a float variable with `dim` components per particle from points.
    pub fn set_points(&mut self, var: VarId, points: &[DVec3]) -> Result<(), StateError> {
        let dim = self.swarm.dimensionality().dim();
        let name = self.swarm.channel(var)?.name().to_string();
        if points.len() != self.num_particles() {
            return Err(StateError::LengthMismatch {
                name,
                expected: self.num_particles(),
                found: points.len(),
            });
        }
        let values = self.data_mut(var)?;
        if values.len() != points.len() * dim {
            return Err(StateError::LengthMismatch {
                name,
                expected: values.len(),
                found: points.len() * dim,
            });
        }
        self.swarm.set_points(var, points)
    }

    /// Open an inner scope that adds `writable` to the write set. Only the outermost scope
    /// commits.
    pub fn nested(&mut self, writable: &[VarId]) -> Result<Access<'_, M>, StateError> {
        self.swarm.open_scope(writable)?;
        Ok(Access::new(self.swarm))
    }

    /// Close the scope and return the result of the commit.
    pub fn commit(mut self) -> Result<(), SwarmError> {
        self.closed = true;
        self.swarm.close_scope()
    }
}

impl<'a, M: Mesh> Drop for Access<'a, M> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.swarm.close_scope() {
            if std::thread::panicking() {
                error!("Failed to commit swarm access while unwinding: {e}");
            } else {
                panic!("Failed to commit swarm access: {e}");
            }
        }
    }
}
