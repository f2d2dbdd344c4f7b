use clap::Parser;
use glam::DVec3;
use pic_swarm::{
    thread_world, AdvectionOptions, Boundary, Communicator, DataType, Dimensionality, FillLayout,
    IntegrationOrder, Mesh, NodeKey, ProxyOptions, StructuredMesh, Swarm, SwarmError,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{error::Error, f64::consts::PI, fmt::Display, fs, path::PathBuf};
use tracing::info;
use tracing_subscriber::prelude::*;
use yaml_rust::{Yaml, YamlLoader};

#[derive(Debug)]
pub enum ConfigError {
    MissingParameter(String),
    UnknownFlow(String),
    IllegalDVec3(String),
    InvalidArrayFormat(Yaml),
    Swarm(pic_swarm::ConfigError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingParameter(name) => {
                write!(f, "Missing required parameter in configuration: {}", name)
            }
            ConfigError::UnknownFlow(name) => {
                write!(f, "Unknown type of flow configured: {}", name)
            }
            ConfigError::IllegalDVec3(name) => {
                write!(f, "Illegal DVec3 format: {}!", name)
            }
            ConfigError::InvalidArrayFormat(value) => {
                write!(f, "Expected array of integers but found: {:?}", value)
            }
            ConfigError::Swarm(e) => write!(f, "{e}"),
        }
    }
}

impl Error for ConfigError {}

impl From<pic_swarm::ConfigError> for ConfigError {
    fn from(e: pic_swarm::ConfigError) -> Self {
        ConfigError::Swarm(e)
    }
}

fn parse_dvec3(yaml: &Yaml) -> Result<DVec3, ()> {
    let yaml_vec = yaml.as_vec().ok_or(())?;
    let values = yaml_vec
        .iter()
        .map(|y| match y {
            Yaml::Real(s) => s.parse::<f64>().map_err(|_| ()),
            Yaml::Integer(i) => Ok(*i as f64),
            _ => Err(()),
        })
        .collect::<Result<Vec<_>, _>>()?;
    match values[..] {
        [x, y] => Ok(DVec3::new(x, y, 0.)),
        [x, y, z] => Ok(DVec3::new(x, y, z)),
        _ => Err(()),
    }
}

fn parse_dvec3_or(yaml: &Yaml, default: DVec3, name: &str) -> Result<DVec3, ConfigError> {
    if yaml.is_badvalue() {
        return Ok(default);
    }
    parse_dvec3(yaml).map_err(|_| ConfigError::IllegalDVec3(name.to_string()))
}

fn parse_str<T: std::str::FromStr<Err = pic_swarm::ConfigError>>(
    yaml: &Yaml,
    default: &str,
) -> Result<T, ConfigError> {
    Ok(yaml.as_str().unwrap_or(default).parse::<T>()?)
}

struct MeshCfg {
    dimensionality: Dimensionality,
    resolution: Vec<usize>,
    min: DVec3,
    max: DVec3,
    boundary: Boundary,
}

impl MeshCfg {
    fn parse(yaml: &Yaml) -> Result<Self, ConfigError> {
        let resolution = yaml["resolution"]
            .as_vec()
            .ok_or(ConfigError::MissingParameter("mesh:resolution".to_string()))?
            .iter()
            .map(|y| match y {
                Yaml::Integer(i) if *i > 0 => Ok(*i as usize),
                _ => Err(ConfigError::InvalidArrayFormat(yaml["resolution"].clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let dimensionality = match resolution.len() {
            3 => Dimensionality::ThreeD,
            _ => Dimensionality::TwoD,
        };
        Ok(Self {
            dimensionality,
            resolution,
            min: parse_dvec3_or(&yaml["min"], DVec3::ZERO, "mesh:min")?,
            max: parse_dvec3_or(&yaml["max"], DVec3::ONE, "mesh:max")?,
            boundary: parse_str(&yaml["boundary"], "reflective")?,
        })
    }
}

struct SwarmCfg {
    layout: FillLayout,
    fill_param: usize,
    proxy: ProxyOptions,
    disc_centre: DVec3,
    disc_radius: f64,
    tracers: usize,
    seed: u64,
}

impl SwarmCfg {
    fn parse(yaml: &Yaml) -> Result<Self, ConfigError> {
        let fill_param = yaml["fill_param"]
            .as_i64()
            .ok_or(ConfigError::MissingParameter("swarm:fill_param".to_string()))?
            as usize;
        let proxy = ProxyOptions {
            degree: yaml["proxy_degree"].as_i64().unwrap_or(1) as u8,
            continuous: yaml["proxy_continuous"].as_bool().unwrap_or(true),
            nearest_neighbour_only: yaml["nearest_neighbour_only"].as_bool().unwrap_or(false),
        };
        Ok(Self {
            layout: parse_str(&yaml["layout"], "gauss")?,
            fill_param,
            proxy,
            disc_centre: parse_dvec3_or(
                &yaml["disc_centre"],
                DVec3::new(0.5, 0.75, 0.),
                "swarm:disc_centre",
            )?,
            disc_radius: yaml["disc_radius"].as_f64().unwrap_or(0.15),
            tracers: yaml["tracers"].as_i64().unwrap_or(0) as usize,
            seed: yaml["seed"].as_i64().unwrap_or(0) as u64,
        })
    }
}

#[derive(Clone, Copy)]
enum Flow {
    Uniform { velocity: DVec3 },
    Rotation { centre: DVec3, angular_velocity: f64 },
    /// Single vortex of the unit square, tangential to its boundary
    Vortex { period: f64 },
}

impl Flow {
    fn velocity(&self, x: DVec3, t: f64) -> DVec3 {
        match self {
            Flow::Uniform { velocity } => *velocity,
            Flow::Rotation {
                centre,
                angular_velocity,
            } => {
                let r = x - *centre;
                *angular_velocity * DVec3::new(-r.y, r.x, 0.)
            }
            Flow::Vortex { period } => {
                let scale = (PI * t / period).cos();
                scale
                    * DVec3::new(
                        -(PI * x.x).sin().powi(2) * (2. * PI * x.y).sin(),
                        (PI * x.y).sin().powi(2) * (2. * PI * x.x).sin(),
                        0.,
                    )
            }
        }
    }
}

struct AdvectionCfg {
    flow: Flow,
    options: AdvectionOptions,
}

impl AdvectionCfg {
    fn parse(yaml: &Yaml) -> Result<Self, ConfigError> {
        let kind = yaml["flow"].as_str().unwrap_or("vortex");
        let flow = match kind {
            "uniform" => Flow::Uniform {
                velocity: parse_dvec3(&yaml["velocity"])
                    .map_err(|_| ConfigError::IllegalDVec3("advection:velocity".to_string()))?,
            },
            "rotation" => Flow::Rotation {
                centre: parse_dvec3_or(&yaml["centre"], DVec3::new(0.5, 0.5, 0.), "advection:centre")?,
                angular_velocity: yaml["angular_velocity"].as_f64().unwrap_or(1.),
            },
            "vortex" => Flow::Vortex {
                period: yaml["period"].as_f64().unwrap_or(4.),
            },
            _ => return Err(ConfigError::UnknownFlow(kind.to_string())),
        };
        let order = match &yaml["order"] {
            Yaml::Integer(i) => IntegrationOrder::try_from(*i as u8)
                .map_err(|_| pic_swarm::ConfigError::UnknownOrder(i.to_string()))?,
            other => parse_str(other, "second")?,
        };
        Ok(Self {
            flow,
            options: AdvectionOptions {
                order,
                corrector: yaml["corrector"].as_bool().unwrap_or(false),
            },
        })
    }
}

struct TimeIntegrationCfg {
    t_end: f64,
    cfl: f64,
    dt_max: f64,
}

impl TimeIntegrationCfg {
    fn parse(yaml: &Yaml) -> Result<Self, ConfigError> {
        Ok(Self {
            t_end: yaml["t_end"]
                .as_f64()
                .ok_or(ConfigError::MissingParameter("time_integration:t_end".to_string()))?,
            cfl: yaml["cfl_criterion"].as_f64().ok_or(ConfigError::MissingParameter(
                "time_integration:cfl_criterion".to_string(),
            ))?,
            dt_max: yaml["dt_max"].as_f64().unwrap_or(f64::INFINITY),
        })
    }
}

struct RunCfg {
    ranks: usize,
    dt_status: f64,
}

impl RunCfg {
    fn parse(yaml: &Yaml) -> Result<Self, ConfigError> {
        Ok(Self {
            ranks: yaml["ranks"].as_i64().unwrap_or(1).max(1) as usize,
            dt_status: yaml["dt_status"].as_f64().unwrap_or(f64::INFINITY),
        })
    }
}

struct Config {
    mesh: MeshCfg,
    swarm: SwarmCfg,
    advection: AdvectionCfg,
    time_integration: TimeIntegrationCfg,
    run: RunCfg,
}

impl Config {
    fn parse(file: PathBuf) -> Result<Self, Box<dyn Error>> {
        let docs = YamlLoader::load_from_str(&fs::read_to_string(file)?)?;
        let config_yml = &docs[0];
        Ok(Self {
            mesh: MeshCfg::parse(&config_yml["mesh"])?,
            swarm: SwarmCfg::parse(&config_yml["swarm"])?,
            advection: AdvectionCfg::parse(&config_yml["advection"])?,
            time_integration: TimeIntegrationCfg::parse(&config_yml["time_integration"])?,
            run: RunCfg::parse(&config_yml["run"])?,
        })
    }
}

#[derive(Parser)]
pub struct Cli {
    /// The path to the config file to read
    #[clap(parse(from_os_str))]
    pub config: PathBuf,
}

struct Report {
    initial_particles: usize,
    final_particles: usize,
    steps: usize,
    material_area: f64,
}

fn run_rank(
    config: &Config,
    mesh: StructuredMesh,
    comm: impl Communicator + 'static,
) -> Result<Report, SwarmError> {
    let rank = mesh.rank();
    let mut swarm = Swarm::new(mesh, comm);
    let material = swarm.add_index_variable("material", 2, config.swarm.proxy)?;
    let age = swarm.add_variable("age", 1, DataType::Float, Some(config.swarm.proxy))?;
    swarm.populate(config.swarm.layout, config.swarm.fill_param)?;

    let mut access = swarm.access(&[material])?;
    let positions = access.positions();
    for (m, x) in access.int_data_mut(material)?.iter_mut().zip(positions) {
        if x.distance(config.swarm.disc_centre) < config.swarm.disc_radius {
            *m = 1;
        }
    }
    access.commit()?;

    // Passive tracers are seeded on the first rank and migrate to their owners
    let tracers: Vec<DVec3> = if rank == 0 {
        let (lo, hi) = swarm.mesh().bounds();
        let dim = swarm.dimensionality().dim();
        let mut rng = StdRng::seed_from_u64(config.swarm.seed);
        (0..config.swarm.tracers)
            .map(|_| {
                let mut x = DVec3::ZERO;
                for i in 0..dim {
                    x[i] = rng.gen_range(lo[i]..hi[i]);
                }
                x
            })
            .collect()
    } else {
        vec![]
    };
    swarm.add_particles(&tracers)?;
    let initial_particles = swarm.global_num_particles();
    if rank == 0 {
        info!(particles = initial_particles, "Initialised swarm");
    }

    let restore = swarm.mesh().restore(config.mesh.boundary);
    let flow = config.advection.flow;
    let time = &config.time_integration;
    let mut t = 0.;
    let mut t_status = config.run.dt_status;
    let mut steps = 0;
    while t < time.t_end {
        let velocity = |x: DVec3| flow.velocity(x, t);
        let dt = (time.cfl * swarm.estimate_dt(&velocity)?)
            .min(time.dt_max)
            .min(time.t_end - t);
        if dt <= 0. {
            break;
        }
        let t_mid = t + 0.5 * dt;
        let velocity = |x: DVec3| flow.velocity(x, t_mid);
        swarm.advect(&velocity, dt, config.advection.options, Some(&restore))?;

        let mut access = swarm.access(&[age])?;
        for a in access.data_mut(age)?.iter_mut() {
            *a += dt;
        }
        access.commit()?;

        t += dt;
        steps += 1;
        if t >= t_status {
            t_status += config.run.dt_status;
            let particles = swarm.global_num_particles();
            if rank == 0 {
                info!(step = steps, t, dt, particles, "Advected swarm");
            }
        }
    }

    let final_particles = swarm.global_num_particles();
    let key = NodeKey::new(config.swarm.proxy.degree, config.swarm.proxy.continuous)?;
    let owned = swarm.mesh().nodes(key).owned;
    let material_area = match swarm.masks(material)?.and_then(|masks| masks.mask(1)) {
        Some(mask) => mask.stats(&owned, swarm.comm())?.mean,
        None => 0.,
    };
    let age_stats = swarm.proxy_stats(age)?;
    if rank == 0 {
        if let Some(stats) = age_stats {
            info!(mean = stats.mean, min = stats.min, max = stats.max, "Particle age proxy");
        }
    }
    Ok(Report {
        initial_particles,
        final_particles,
        steps,
        material_area,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse command line parameters
    let args = Cli::parse();

    // read configuration
    let config = Config::parse(args.config)?;

    let mesh = StructuredMesh::new(
        config.mesh.dimensionality,
        &config.mesh.resolution,
        config.mesh.min,
        config.mesh.max,
    )?;
    // Launched by mpirun on several processes: one rank per process
    #[cfg(feature = "mpi")]
    if let Some(universe) = mpi::initialize() {
        let comm = pic_swarm::MpiComm::new(&universe);
        if comm.size() > 1 {
            let mesh = mesh.partitioned(comm.rank(), comm.size())?;
            let rank = comm.rank();
            let report = run_rank(&config, mesh, comm)?;
            if rank == 0 {
                log_report(&report);
            }
            return Ok(());
        }
    }

    let ranks = config.run.ranks;
    let meshes = (0..ranks)
        .map(|rank| mesh.clone().partitioned(rank, ranks))
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        cells = mesh.num_cells(),
        ranks,
        "Running {} flow over a material disc",
        match config.advection.flow {
            Flow::Uniform { .. } => "uniform",
            Flow::Rotation { .. } => "rotation",
            Flow::Vortex { .. } => "vortex",
        }
    );

    let reports = std::thread::scope(|s| {
        let handles: Vec<_> = meshes
            .into_iter()
            .zip(thread_world(ranks))
            .map(|(mesh, comm)| {
                let config = &config;
                s.spawn(move || run_rank(config, mesh, comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| "rank panicked".to_string()))
            .collect::<Vec<_>>()
    });

    let report = match reports.into_iter().next() {
        Some(report) => report??,
        None => return Ok(()),
    };
    log_report(&report);
    Ok(())
}

fn log_report(report: &Report) {
    info!(
        steps = report.steps,
        initial = report.initial_particles,
        remaining = report.final_particles,
        lost = report.initial_particles as i64 - report.final_particles as i64,
        material_area = report.material_area,
        "Done"
    );
}
