use std::{f64::consts::PI, fmt::Display, str::FromStr};

use glam::DVec3;

use crate::errors::ConfigError;

/// Particle population fill type.
///
/// * `Regular` places `fill_param` points per direction on a regular lattice of cell-centred points.
/// * `Gauss` places points on the `fill_param`-point Gauss-Legendre tensor product rule.
/// * `Subdivision` places points on the centroids of the reference cell subdivided `fill_param` times,
///   i.e. `2^fill_param` points per direction.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[repr(u8)]
pub enum FillLayout {
    Regular = 0,
    Gauss = 1,
    Subdivision = 2,
}

impl Default for FillLayout {
    fn default() -> Self {
        FillLayout::Gauss
    }
}

impl Display for FillLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillLayout::Regular => write!(f, "regular"),
            FillLayout::Gauss => write!(f, "gauss"),
            FillLayout::Subdivision => write!(f, "subdivision"),
        }
    }
}

impl FromStr for FillLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regular" => Ok(FillLayout::Regular),
            "gauss" => Ok(FillLayout::Gauss),
            "subdivision" => Ok(FillLayout::Subdivision),
            _ => Err(ConfigError::UnknownLayout(s.to_string())),
        }
    }
}

const MAX_SUBDIVISIONS: usize = 10;

/// Gauss-Legendre points and weights on `[-1, 1]`, sorted by increasing abscissa.
pub fn gauss_legendre(n: usize) -> Vec<(f64, f64)> {
    let mut rule = Vec::with_capacity(n);
    for i in 0..n {
        // Initial guess for the i-th root (Tricomi)
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 1.;
        for _ in 0..100 {
            let (p, p_prev) = legendre(n, x);
            dp = n as f64 * (x * p - p_prev) / (x * x - 1.);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let w = 2. / ((1. - x * x) * dp * dp);
        rule.push((x, w));
    }
    rule.reverse();
    rule
}

/// Returns `(P_n(x), P_{n-1}(x))`.
fn legendre(n: usize, x: f64) -> (f64, f64) {
    let mut p_prev = 1.;
    let mut p = x;
    if n == 0 {
        return (1., 0.);
    }
    for k in 2..=n {
        let k = k as f64;
        let p_next = ((2. * k - 1.) * x * p - (k - 1.) * p_prev) / k;
        p_prev = p;
        p = p_next;
    }
    (p, p_prev)
}

/// The 1D reference positions (in `[0, 1]`) of a fill layout.
pub fn reference_positions_1d(layout: FillLayout, fill_param: usize) -> Result<Vec<f64>, ConfigError> {
    let invalid = || ConfigError::InvalidFillParameter {
        layout: layout.to_string(),
        fill_param,
    };
    match layout {
        FillLayout::Regular => {
            if fill_param == 0 {
                return Err(invalid());
            }
            let n_inv = 1. / fill_param as f64;
            Ok((0..fill_param).map(|i| (i as f64 + 0.5) * n_inv).collect())
        }
        FillLayout::Gauss => {
            if fill_param == 0 {
                return Err(invalid());
            }
            Ok(gauss_legendre(fill_param)
                .into_iter()
                .map(|(x, _)| 0.5 * (x + 1.))
                .collect())
        }
        FillLayout::Subdivision => {
            if fill_param > MAX_SUBDIVISIONS {
                return Err(invalid());
            }
            let n = 1usize << fill_param;
            let n_inv = 1. / n as f64;
            Ok((0..n).map(|i| (i as f64 + 0.5) * n_inv).collect())
        }
    }
}

/// Tensor product of 1D reference positions over `dimension` directions.
pub fn tensor_points(positions: &[f64], dimension: usize) -> Vec<DVec3> {
    let n = positions.len();
    let nz = if dimension == 3 { n } else { 1 };
    let mut points = Vec::with_capacity(n * n * nz);
    for k in 0..nz {
        for j in 0..n {
            for i in 0..n {
                let z = if dimension == 3 { positions[k] } else { 0. };
                points.push(DVec3::new(positions[i], positions[j], z));
            }
        }
    }
    points
}

/// Reference cell (`[0, 1]^dim`) points of a fill layout.
pub fn reference_points(
    layout: FillLayout,
    fill_param: usize,
    dimension: usize,
) -> Result<Vec<DVec3>, ConfigError> {
    Ok(tensor_points(
        &reference_positions_1d(layout, fill_param)?,
        dimension,
    ))
}
