use std::str::FromStr;

use glam::DVec3;

use crate::{
    errors::ConfigError,
    utils::{box_clamp, box_reflect, box_wrap, Dimensionality},
};

/// Maps a position that may have left the domain back to a valid one.
pub trait PointRestore: Sync {
    fn restore(&self, point: DVec3) -> DVec3;
}

impl<F> PointRestore for F
where
    F: Fn(DVec3) -> DVec3 + Sync,
{
    fn restore(&self, point: DVec3) -> DVec3 {
        self(point)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    Periodic,
    Reflective,
    Clamp,
}

impl FromStr for Boundary {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "periodic" => Ok(Boundary::Periodic),
            "reflective" => Ok(Boundary::Reflective),
            "clamp" | "open" => Ok(Boundary::Clamp),
            _ => Err(ConfigError::UnknownBoundary(s.to_string())),
        }
    }
}

/// Restoration to an axis aligned box.
#[derive(Clone, Copy, Debug)]
pub struct BoxRestore {
    lo: DVec3,
    hi: DVec3,
    boundary: Boundary,
    dimension: usize,
}

impl BoxRestore {
    pub fn new(lo: DVec3, hi: DVec3, boundary: Boundary, dimensionality: Dimensionality) -> Self {
        Self {
            lo,
            hi,
            boundary,
            dimension: dimensionality.dim(),
        }
    }
}

impl PointRestore for BoxRestore {
    fn restore(&self, mut point: DVec3) -> DVec3 {
        match self.boundary {
            Boundary::Periodic => box_wrap(self.lo, self.hi, &mut point, self.dimension),
            Boundary::Reflective => box_reflect(self.lo, self.hi, &mut point, self.dimension),
            Boundary::Clamp => box_clamp(self.lo, self.hi, &mut point, self.dimension),
        }
        point
    }
}
