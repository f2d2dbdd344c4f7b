use std::str::FromStr;

use glam::DVec3;
use rayon::prelude::*;
use tracing::debug;

use crate::{
    channel::VarId,
    comm::ReduceOp,
    errors::{ConfigError, SwarmError},
    mesh::Mesh,
    restore::PointRestore,
    swarm::Swarm,
};

/// A velocity that can be sampled at the positions of the local particles.
pub trait VelocityField: Sync {
    fn evaluate(&self, points: &[DVec3]) -> Result<Vec<DVec3>, SwarmError>;
}

impl<F> VelocityField for F
where
    F: Fn(DVec3) -> DVec3 + Sync,
{
    fn evaluate(&self, points: &[DVec3]) -> Result<Vec<DVec3>, SwarmError> {
        Ok(points.par_iter().map(|p| self(*p)).collect())
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[repr(u8)]
pub enum IntegrationOrder {
    /// Forward Euler
    First = 1,
    /// Midpoint
    Second = 2,
}

impl FromStr for IntegrationOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "first" | "euler" => Ok(IntegrationOrder::First),
            "2" | "second" | "midpoint" => Ok(IntegrationOrder::Second),
            _ => Err(ConfigError::UnknownOrder(s.to_string())),
        }
    }
}

/// Whether the launch points of the particles hold the start of the previous step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchPoint {
    Uninitialized,
    Stored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvectionOptions {
    pub order: IntegrationOrder,
    /// Correct the landing point of the previous step with the velocity at the current position
    pub corrector: bool,
}

impl Default for AdvectionOptions {
    fn default() -> Self {
        Self {
            order: IntegrationOrder::Second,
            corrector: false,
        }
    }
}

impl<M: Mesh> Swarm<M> {
    /// Move every particle through `velocity` over a step `dt` (collective).
    ///
    /// Every position update is committed on its own, so the particles are relocated and migrated
    /// before the velocity is sampled again. `restore` maps updated positions back into the domain.
    pub fn advect(
        &mut self,
        velocity: &dyn VelocityField,
        dt: f64,
        options: AdvectionOptions,
        restore: Option<&dyn PointRestore>,
    ) -> Result<(), SwarmError> {
        if dt == 0. {
            return Ok(());
        }
        let restore_point = |p: DVec3| restore.map_or(p, |r| r.restore(p));

        if options.order == IntegrationOrder::First {
            let x = self.positions();
            let v = velocity.evaluate(&x)?;
            let updated: Vec<_> = x.iter().zip(v).map(|(x, v)| restore_point(*x + dt * v)).collect();
            return self.commit_positions(&updated);
        }

        if options.corrector && self.launch == LaunchPoint::Stored {
            let x = self.positions();
            let x0 = self.points(VarId::LAUNCH_POINT)?;
            let v = velocity.evaluate(&x)?;
            let corrected: Vec<_> = x
                .iter()
                .zip(x0.iter().zip(v))
                .map(|(x, (x0, v))| restore_point(0.5 * (restore_point(*x0 + dt * v) + *x)))
                .collect();
            self.commit_positions(&corrected)?;
            debug!("Corrected landing points of the previous step");
        }

        let x = self.positions();
        {
            let mut access = self.access(&[VarId::LAUNCH_POINT])?;
            access.set_points(VarId::LAUNCH_POINT, &x)?;
            access.commit()?;
        }
        self.launch = LaunchPoint::Stored;

        let v = velocity.evaluate(&x)?;
        let midpoints: Vec<_> = x
            .iter()
            .zip(v)
            .map(|(x, v)| restore_point(*x + 0.5 * dt * v))
            .collect();
        self.commit_positions(&midpoints)?;

        // Migration may have reordered the particles
        let x_mid = self.positions();
        let x0 = self.points(VarId::LAUNCH_POINT)?;
        let v = velocity.evaluate(&x_mid)?;
        let updated: Vec<_> = x0.iter().zip(v).map(|(x0, v)| restore_point(*x0 + dt * v)).collect();
        self.commit_positions(&updated)
    }

    fn commit_positions(&mut self, positions: &[DVec3]) -> Result<(), SwarmError> {
        let mut access = self.access(&[VarId::COORDINATES])?;
        access.set_positions(positions)?;
        access.commit()
    }

    /// Largest stable step: the smallest cell radius over the largest particle speed, both over
    /// all ranks (collective). Infinite when nothing moves.
    pub fn estimate_dt(&self, velocity: &dyn VelocityField) -> Result<f64, SwarmError> {
        let v = velocity.evaluate(&self.positions())?;
        let local_speed = v.iter().map(|v| v.length()).fold(0., f64::max);
        let max_speed = self.comm().all_reduce(local_speed, ReduceOp::Max);
        let min_radius = self.comm().all_reduce(self.mesh().min_radius(), ReduceOp::Min);
        if max_speed > 0. {
            Ok(min_radius / max_speed)
        } else {
            Ok(f64::INFINITY)
        }
    }
}
