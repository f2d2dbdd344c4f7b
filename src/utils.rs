use glam::DVec3;

/// The number of meaningful components of the particle and mesh coordinates.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[repr(usize)]
pub enum Dimensionality {
    TwoD = 2,
    ThreeD = 3,
}

impl Dimensionality {
    pub fn dim(self) -> usize {
        self.into()
    }
}

pub fn box_wrap(lo: DVec3, hi: DVec3, pos: &mut DVec3, dimension: usize) {
    for i in 0..dimension {
        let size = hi[i] - lo[i];
        if pos[i] < lo[i] || pos[i] >= hi[i] {
            let mut r = (pos[i] - lo[i]).rem_euclid(size);
            // Tiny negative offsets round up to the full period
            if r >= size {
                r -= size;
            }
            pos[i] = lo[i] + r;
        }
    }
}

pub fn box_reflect(lo: DVec3, hi: DVec3, pos: &mut DVec3, dimension: usize) {
    for i in 0..dimension {
        if pos[i] < lo[i] {
            pos[i] = 2. * lo[i] - pos[i];
        }
        if pos[i] > hi[i] {
            pos[i] = 2. * hi[i] - pos[i];
        }
        // Large excursions can overshoot the opposite wall
        pos[i] = pos[i].clamp(lo[i], hi[i]);
    }
}

pub fn box_clamp(lo: DVec3, hi: DVec3, pos: &mut DVec3, dimension: usize) {
    for i in 0..dimension {
        pos[i] = pos[i].clamp(lo[i], hi[i]);
    }
}

/// Unpack a flat coordinate array with `dimension` components per point.
pub fn to_points(flat: &[f64], dimension: usize) -> Vec<DVec3> {
    flat.chunks_exact(dimension)
        .map(|c| {
            let mut p = DVec3::ZERO;
            for (i, v) in c.iter().enumerate() {
                p[i] = *v;
            }
            p
        })
        .collect()
}

/// Write points back into a flat array with `dimension` components per point.
pub fn write_points(points: &[DVec3], flat: &mut [f64], dimension: usize) {
    for (chunk, point) in flat.chunks_exact_mut(dimension).zip(points.iter()) {
        for (i, v) in chunk.iter_mut().enumerate() {
            *v = point[i];
        }
    }
}
