//! The particle store: parallel attribute arrays co-indexed with the particles of this process,
//! their mesh proxies and the migration protocol.

use std::collections::{BTreeSet, HashMap};

use glam::DVec3;
use tracing::debug;

use crate::{
    access::Access,
    advection::LaunchPoint,
    cell_locator::CellLocator,
    channel::{Channel, ChannelData, DataType, Proxy, ProxyOptions, VarId},
    comm::{Communicator, MigrationPacket, ReduceOp, SingleProcess},
    errors::{ConfigError, LocationError, StateError, SwarmError},
    field::{FieldStats, MeshField, NodalFunction},
    material::MaterialMasks,
    mesh::{Mesh, NodeKey, NodeLayout},
    projector::{FieldProjector, ProjectionMap},
    quadrature::{reference_points, FillLayout},
    spatial_index::SpatialIndex,
    utils::{to_points, write_points, Dimensionality},
};

pub(crate) struct Transaction {
    pub(crate) depth: usize,
    pub(crate) write_set: BTreeSet<VarId>,
}

/// Node coordinates of one discretisation and the search structures derived from them.
struct NodeCache {
    layout: NodeLayout,
    index: SpatialIndex,
    /// Dropped whenever the particles move or migrate
    map: Option<ProjectionMap>,
}

impl NodeCache {
    fn build<M: Mesh>(mesh: &M, key: NodeKey) -> Self {
        let layout = mesh.nodes(key);
        let index = SpatialIndex::build(&layout.coords);
        Self {
            layout,
            index,
            map: None,
        }
    }
}

pub struct Swarm<M: Mesh> {
    mesh: M,
    comm: Box<dyn Communicator>,
    dimensionality: Dimensionality,
    channels: Vec<Channel>,
    names: HashMap<String, VarId>,
    num_particles: usize,
    pub(crate) txn: Option<Transaction>,
    state: u64,
    pub(crate) launch: LaunchPoint,
    locator: Option<CellLocator>,
    particle_index: Option<SpatialIndex>,
    node_caches: HashMap<NodeKey, NodeCache>,
}

impl<M: Mesh> Swarm<M> {
    pub fn new(mesh: M, comm: impl Communicator + 'static) -> Self {
        let dimensionality = mesh.dimensionality();
        let dim = dimensionality.dim();
        let builtins = [
            Channel::new("coordinates", dim, DataType::Float, Proxy::None),
            Channel::new("cell_id", 1, DataType::Int, Proxy::None),
            Channel::new("launch_point", dim, DataType::Float, Proxy::None),
        ];
        let names = builtins
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), VarId(i)))
            .collect();

        Self {
            mesh,
            comm: Box::new(comm),
            dimensionality,
            channels: builtins.into(),
            names,
            num_particles: 0,
            txn: None,
            state: 0,
            launch: LaunchPoint::Uninitialized,
            locator: None,
            particle_index: None,
            node_caches: HashMap::new(),
        }
    }

    /// A swarm on a mesh that is not distributed.
    pub fn serial(mesh: M) -> Self {
        Self::new(mesh, SingleProcess)
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn dimensionality(&self) -> Dimensionality {
        self.dimensionality
    }

    /// Number of particles owned by this process.
    pub fn num_particles(&self) -> usize {
        self.num_particles
    }

    /// Number of particles over all processes (collective).
    pub fn global_num_particles(&self) -> usize {
        self.comm.all_reduce(self.num_particles as f64, ReduceOp::Sum) as usize
    }

    /// Incremented whenever the particle positions are opened for writing.
    pub fn state(&self) -> u64 {
        self.state
    }

    pub fn launch_point(&self) -> LaunchPoint {
        self.launch
    }

    pub fn variable(&self, name: &str) -> Option<VarId> {
        self.names.get(name).copied()
    }

    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        (0..self.channels.len()).map(VarId)
    }

    pub fn channel(&self, var: VarId) -> Result<&Channel, StateError> {
        self.channels
            .get(var.0)
            .ok_or(StateError::UnknownVariable(var.0))
    }

    pub(crate) fn channel_mut(&mut self, var: VarId) -> Result<&mut Channel, StateError> {
        self.channels
            .get_mut(var.0)
            .ok_or(StateError::UnknownVariable(var.0))
    }

    /// Register a new variable. Existing particles get zeros.
    pub fn add_variable(
        &mut self,
        name: &str,
        num_components: usize,
        data_type: DataType,
        proxy: Option<ProxyOptions>,
    ) -> Result<VarId, SwarmError> {
        self.check_new_name(name)?;
        if num_components == 0 {
            return Err(ConfigError::InvalidComponentCount {
                name: name.to_string(),
                count: num_components,
            }
            .into());
        }
        let proxy = match proxy {
            Some(options) => {
                let layout = self.mesh.nodes(options.key()?);
                Proxy::Nodal {
                    options,
                    field: MeshField::new(&format!("{name}_proxy"), num_components, &layout),
                }
            }
            None => Proxy::None,
        };
        Ok(self.register(Channel::new(name, num_components, data_type, proxy)))
    }

    /// Register an integer variable holding one of `categories` material indices per particle,
    /// with a mask proxy per category.
    pub fn add_index_variable(
        &mut self,
        name: &str,
        categories: usize,
        options: ProxyOptions,
    ) -> Result<VarId, SwarmError> {
        self.check_new_name(name)?;
        if categories == 0 {
            return Err(ConfigError::InvalidCategoryCount(name.to_string()).into());
        }
        let layout = self.mesh.nodes(options.key()?);
        let masks = MaterialMasks::new(name, categories, options, &layout);
        Ok(self.register(Channel::new(name, 1, DataType::Int, Proxy::Masks(masks))))
    }

    fn check_new_name(&self, name: &str) -> Result<(), ConfigError> {
        if self.names.contains_key(name) {
            return Err(ConfigError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn register(&mut self, mut channel: Channel) -> VarId {
        let var = VarId(self.channels.len());
        channel.data.resize(self.num_particles * channel.num_components);
        self.names.insert(channel.name.clone(), var);
        self.channels.push(channel);
        self.refresh_proxies(&[var]);
        var
    }

    /// Raw data of a variable. Only available while a transaction is open, see [`Swarm::access`].
    pub fn data(&self, var: VarId) -> Result<&ChannelData, StateError> {
        let channel = self.channel(var)?;
        if self.txn.is_none() {
            return Err(StateError::NoTransaction(channel.name.clone()));
        }
        Ok(&channel.data)
    }

    /// The nodal proxy of a variable, if it has one.
    pub fn proxy(&self, var: VarId) -> Result<Option<&MeshField>, StateError> {
        Ok(match &self.channel(var)?.proxy {
            Proxy::Nodal { field, .. } => Some(field),
            _ => None,
        })
    }

    /// The mask proxies of an index variable.
    pub fn masks(&self, var: VarId) -> Result<Option<&MaterialMasks>, StateError> {
        Ok(match &self.channel(var)?.proxy {
            Proxy::Masks(masks) => Some(masks),
            _ => None,
        })
    }

    /// Global statistics of a scalar nodal proxy (collective).
    pub fn proxy_stats(&mut self, var: VarId) -> Result<Option<FieldStats>, SwarmError> {
        let key = match self.proxy(var)? {
            Some(field) => field.key(),
            None => return Ok(None),
        };
        self.ensure_node_cache(key);
        let owned = match self.node_caches.get(&key) {
            Some(cache) => cache.layout.owned.clone(),
            None => return Ok(None),
        };
        match self.proxy(var)? {
            Some(field) => Ok(Some(field.stats(&owned, self.comm.as_ref())?)),
            None => Ok(None),
        }
    }

    /// The nodal proxy of a variable as a function that can be evaluated anywhere in the local
    /// part of the mesh.
    pub fn proxy_function(&self, var: VarId) -> Result<Option<NodalFunction<M>>, StateError>
    where
        M: Clone,
    {
        Ok(self
            .proxy(var)?
            .map(|field| NodalFunction::new(self.mesh.clone(), field.clone())))
    }

    /// Open a transaction granting write access to `writable`, see [`Access`].
    pub fn access(&mut self, writable: &[VarId]) -> Result<Access<'_, M>, StateError> {
        self.open_scope(writable)?;
        Ok(Access::new(self))
    }

    pub(crate) fn open_scope(&mut self, writable: &[VarId]) -> Result<(), StateError> {
        for var in writable {
            self.channel(*var)?;
        }
        for var in writable {
            self.channels[var.0].state += 1;
        }
        if writable.contains(&VarId::COORDINATES) {
            self.state += 1;
        }
        let txn = self.txn.get_or_insert_with(|| Transaction {
            depth: 0,
            write_set: BTreeSet::new(),
        });
        txn.depth += 1;
        txn.write_set.extend(writable.iter().copied());
        Ok(())
    }

    /// Leave the innermost scope, the outermost one commits.
    pub(crate) fn close_scope(&mut self) -> Result<(), SwarmError> {
        let txn = match self.txn.as_mut() {
            Some(txn) => txn,
            None => return Ok(()),
        };
        txn.depth -= 1;
        if txn.depth > 0 {
            return Ok(());
        }
        let write_set = match self.txn.take() {
            Some(txn) => txn.write_set,
            None => return Ok(()),
        };
        if write_set.contains(&VarId::COORDINATES) {
            self.commit_coordinates()
        } else {
            let vars: Vec<_> = write_set.into_iter().collect();
            self.refresh_proxies(&vars);
            Ok(())
        }
    }

    pub(crate) fn is_writable(&self, var: VarId) -> bool {
        self.txn
            .as_ref()
            .map_or(false, |txn| txn.write_set.contains(&var))
    }

    /// Relocate and migrate after the positions changed, then refresh every proxy.
    fn commit_coordinates(&mut self) -> Result<(), SwarmError> {
        self.migrate()?;
        let vars: Vec<_> = self.variables().collect();
        self.refresh_proxies(&vars);
        Ok(())
    }

    /// Apply `f` to the mesh. When the node coordinates change, every particle is relocated and
    /// all proxies are rebuilt (collective).
    pub fn update_mesh(&mut self, f: impl FnOnce(&mut M)) -> Result<(), SwarmError> {
        let version = self.mesh.coordinate_version();
        f(&mut self.mesh);
        if self.mesh.coordinate_version() == version {
            return Ok(());
        }
        self.locator = None;
        self.node_caches.clear();
        self.commit_coordinates()
    }

    /// Positions of the local particles.
    pub fn positions(&self) -> Vec<DVec3> {
        // Coordinates are registered at construction
        self.points(VarId::COORDINATES).unwrap_or_default()
    }

    /// Values of a float variable with `dim` components per particle, as points.
    pub fn points(&self, var: VarId) -> Result<Vec<DVec3>, StateError> {
        let channel = self.channel(var)?;
        match &channel.data {
            ChannelData::Float(values) => Ok(to_points(values, self.dimensionality.dim())),
            ChannelData::Int(_) => Err(StateError::TypeMismatch {
                name: channel.name().to_string(),
                expected: DataType::Float,
                found: DataType::Int,
            }),
        }
    }

    pub(crate) fn set_points(&mut self, var: VarId, points: &[DVec3]) -> Result<(), StateError> {
        let dim = self.dimensionality.dim();
        let channel = self.channel_mut(var)?;
        match &mut channel.data {
            ChannelData::Float(values) => {
                write_points(points, values, dim);
                Ok(())
            }
            ChannelData::Int(_) => Err(StateError::TypeMismatch {
                name: channel.name().to_string(),
                expected: DataType::Float,
                found: DataType::Int,
            }),
        }
    }

    /// The locator of `mesh`, rebuilt when the mesh coordinates changed since it was built.
    fn current_locator<'a>(locator: &'a mut Option<CellLocator>, mesh: &M) -> &'a CellLocator {
        if locator.as_ref().map_or(false, |l| !l.is_current(mesh)) {
            *locator = None;
        }
        locator.get_or_insert_with(|| CellLocator::build(mesh))
    }

    fn ensure_node_cache(&mut self, key: NodeKey) {
        let version = self.mesh.coordinate_version();
        let mesh = &self.mesh;
        let cache = self
            .node_caches
            .entry(key)
            .or_insert_with(|| NodeCache::build(mesh, key));
        if cache.layout.version != version {
            *cache = NodeCache::build(mesh, key);
        }
    }

    fn invalidate_particle_caches(&mut self) {
        self.particle_index = None;
        for cache in self.node_caches.values_mut() {
            cache.map = None;
        }
    }

    /// Recompute the proxies of `vars` from the current particle data.
    pub(crate) fn refresh_proxies(&mut self, vars: &[VarId]) {
        let keys: BTreeSet<NodeKey> = vars
            .iter()
            .filter_map(|var| self.channels.get(var.0).and_then(|c| c.proxy.key()))
            .collect();
        if keys.is_empty() {
            return;
        }

        let positions = self.positions();
        if self.particle_index.is_none() {
            self.particle_index = Some(SpatialIndex::build(&positions));
        }
        for key in keys.iter() {
            self.ensure_node_cache(*key);
        }
        let (Some(particle_index), node_caches) = (self.particle_index.as_ref(), &mut self.node_caches) else {
            return;
        };
        for key in keys.iter() {
            if let Some(cache) = node_caches.get_mut(key) {
                if cache.map.is_none() {
                    cache.map = Some(ProjectionMap::build(
                        &cache.layout.coords,
                        &cache.index,
                        &positions,
                        particle_index,
                    ));
                }
            }
        }

        for var in vars {
            let Some(channel) = self.channels.get_mut(var.0) else {
                continue;
            };
            let Some(cache) = channel.proxy.key().and_then(|key| self.node_caches.get(&key)) else {
                continue;
            };
            let Some(map) = cache.map.as_ref() else {
                continue;
            };
            match &mut channel.proxy {
                Proxy::None => {}
                Proxy::Nodal { options, field } => {
                    field.conform(&cache.layout);
                    FieldProjector::new(map, options.nearest_neighbour_only)
                        .project(&channel.data.as_f64(), field);
                }
                Proxy::Masks(masks) => {
                    if let ChannelData::Int(values) = &channel.data {
                        masks.update(values, map, &cache.layout);
                    }
                }
            }
            debug!(variable = channel.name.as_str(), "Refreshed proxy");
        }
    }

    /// Discard all particles and fill every local cell with the reference points of `layout`.
    pub fn populate(&mut self, layout: FillLayout, fill_param: usize) -> Result<(), SwarmError> {
        let reference = reference_points(layout, fill_param, self.dimensionality.dim())?;
        let points: Vec<DVec3> = self
            .mesh
            .local_cells()
            .into_iter()
            .flat_map(|cell| {
                let mesh = &self.mesh;
                reference.iter().map(move |xi| mesh.map_to_physical(cell, *xi))
            })
            .collect();
        let cells = Self::current_locator(&mut self.locator, &self.mesh)
            .locate_all(&self.mesh, &points)
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        for channel in self.channels.iter_mut() {
            channel.data.clear();
            channel.data.resize(points.len() * channel.num_components);
        }
        self.num_particles = points.len();
        self.set_points(VarId::COORDINATES, &points)?;
        if let ChannelData::Int(ids) = &mut self.channels[VarId::CELL_ID.0].data {
            for (id, cell) in ids.iter_mut().zip(cells) {
                *id = cell as i64;
            }
        }
        self.channels[VarId::COORDINATES.0].state += 1;
        self.state += 1;
        self.launch = LaunchPoint::Uninitialized;
        self.invalidate_particle_caches();
        debug!(
            num_particles = self.num_particles,
            layout = %layout,
            fill_param,
            "Populated swarm"
        );

        let vars: Vec<_> = self.variables().collect();
        self.refresh_proxies(&vars);
        Ok(())
    }

    /// Append particles at `coords` (collective). Their launch points are set to `coords`, all
    /// other variables start at zero. The new particles are relocated and migrated like after any
    /// change of the positions.
    pub fn add_particles(&mut self, coords: &[DVec3]) -> Result<(), SwarmError> {
        let start = self.num_particles;
        self.num_particles += coords.len();
        for channel in self.channels.iter_mut() {
            channel.data.resize(self.num_particles * channel.num_components);
        }
        let dim = self.dimensionality.dim();
        for var in [VarId::COORDINATES, VarId::LAUNCH_POINT] {
            if let ChannelData::Float(values) = &mut self.channels[var.0].data {
                write_points(coords, &mut values[start * dim..], dim);
            }
        }
        if let ChannelData::Int(ids) = &mut self.channels[VarId::CELL_ID.0].data {
            ids[start..].fill(-1);
        }
        self.channels[VarId::COORDINATES.0].state += 1;
        self.state += 1;
        self.commit_coordinates()
    }

    /// Relocate every particle and send the ones that left the local cells to their owner
    /// (collective).
    ///
    /// When any rank holds a particle outside of the mesh, every rank fails before any particle
    /// is exchanged.
    pub fn migrate(&mut self) -> Result<(), SwarmError> {
        let positions = self.positions();
        let located =
            Self::current_locator(&mut self.locator, &self.mesh).locate_all(&self.mesh, &positions);

        let failures = located.iter().filter(|l| l.is_err()).count();
        let global_failures = self.comm.all_reduce(failures as f64, ReduceOp::Sum) as usize;
        if global_failures > 0 {
            let local_error = located.into_iter().find_map(|l| l.err());
            return Err(local_error
                .unwrap_or(LocationError::RemoteFailure {
                    count: global_failures,
                })
                .into());
        }
        let cells: Vec<usize> = located.into_iter().flatten().collect();
        if let ChannelData::Int(ids) = &mut self.channels[VarId::CELL_ID.0].data {
            for (id, cell) in ids.iter_mut().zip(cells.iter()) {
                *id = *cell as i64;
            }
        }

        let rank = self.comm.rank();
        let size = self.comm.size();
        let owners: Vec<usize> = cells.iter().map(|c| self.mesh.cell_owner(*c)).collect();
        let keep: Vec<bool> = owners.iter().map(|o| *o == rank).collect();
        let mut outgoing = vec![MigrationPacket::default(); size];
        for (p, owner) in owners.iter().enumerate() {
            if *owner != rank {
                self.pack_row(p, &mut outgoing[*owner]);
            }
        }
        let sent: usize = outgoing.iter().map(|p| p.count).sum();
        for channel in self.channels.iter_mut() {
            channel.data.retain_rows(&keep, channel.num_components);
        }
        self.num_particles -= sent;

        let received = self.comm.all_to_all(outgoing);
        let mut num_received = 0;
        for packet in received.iter() {
            self.unpack_rows(packet)?;
            num_received += packet.count;
        }
        self.invalidate_particle_caches();
        debug!(
            rank,
            sent,
            received = num_received,
            num_particles = self.num_particles,
            "Migrated particles"
        );
        Ok(())
    }

    fn floats_per_row(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.data_type() == DataType::Float)
            .map(|c| c.num_components)
            .sum()
    }

    fn ints_per_row(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.data_type() == DataType::Int)
            .map(|c| c.num_components)
            .sum()
    }

    fn pack_row(&self, row: usize, packet: &mut MigrationPacket) {
        for channel in self.channels.iter() {
            let n = channel.num_components;
            match &channel.data {
                ChannelData::Float(v) => packet.floats.extend_from_slice(&v[row * n..(row + 1) * n]),
                ChannelData::Int(v) => packet.ints.extend_from_slice(&v[row * n..(row + 1) * n]),
            }
        }
        packet.count += 1;
    }

    fn unpack_rows(&mut self, packet: &MigrationPacket) -> Result<(), StateError> {
        let (floats_per_row, ints_per_row) = (self.floats_per_row(), self.ints_per_row());
        if packet.floats.len() != packet.count * floats_per_row {
            return Err(StateError::InconsistentPacket {
                expected: packet.count * floats_per_row,
                found: packet.floats.len(),
            });
        }
        if packet.ints.len() != packet.count * ints_per_row {
            return Err(StateError::InconsistentPacket {
                expected: packet.count * ints_per_row,
                found: packet.ints.len(),
            });
        }
        for p in 0..packet.count {
            let mut float_offset = p * floats_per_row;
            let mut int_offset = p * ints_per_row;
            for channel in self.channels.iter_mut() {
                let n = channel.num_components;
                match &mut channel.data {
                    ChannelData::Float(v) => {
                        v.extend_from_slice(&packet.floats[float_offset..float_offset + n]);
                        float_offset += n;
                    }
                    ChannelData::Int(v) => {
                        v.extend_from_slice(&packet.ints[int_offset..int_offset + n]);
                        int_offset += n;
                    }
                }
            }
        }
        self.num_particles += packet.count;
        Ok(())
    }

    /// Set a float variable from a nodal mesh field, evaluated at every particle.
    pub fn project_from(&mut self, var: VarId, field: &MeshField) -> Result<(), SwarmError> {
        let channel = self.channel(var)?;
        if channel.num_components != field.num_components() {
            return Err(ConfigError::ComponentMismatch {
                name: channel.name.clone(),
                expected: channel.num_components,
                found: field.num_components(),
            }
            .into());
        }
        if channel.data_type() != DataType::Float {
            return Err(StateError::TypeMismatch {
                name: channel.name.clone(),
                expected: DataType::Float,
                found: channel.data_type(),
            }
            .into());
        }

        let positions = self.positions();
        let cells = match &self.channels[VarId::CELL_ID.0].data {
            ChannelData::Int(ids) => ids.clone(),
            ChannelData::Float(_) => vec![],
        };
        let mut values = Vec::with_capacity(self.num_particles * field.num_components());
        for (point, cell) in positions.iter().zip(cells.iter()) {
            let cell = *cell as usize;
            let not_local = || LocationError::NotLocal {
                point: *point,
                cell,
                owner: self.mesh.cell_owner(cell),
            };
            let reference = self
                .mesh
                .reference_coords(cell, *point)
                .ok_or_else(not_local)?;
            let value = self
                .mesh
                .interpolate(
                    field.key(),
                    field.values(),
                    field.num_components(),
                    cell,
                    reference,
                )
                .ok_or_else(not_local)?;
            values.extend(value);
        }

        let mut access = self.access(&[var])?;
        access.data_mut(var)?.copy_from_slice(&values);
        access.commit()
    }
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use glam::DVec3;

    use super::*;
    use crate::mesh::StructuredMesh;

    fn unit_swarm(n: usize) -> Swarm<StructuredMesh> {
        Swarm::serial(StructuredMesh::unit_square(n).unwrap())
    }

    #[test]
    fn test_registration() {
        let mut swarm = unit_swarm(2);
        assert_eq!(swarm.variable("coordinates"), Some(VarId::COORDINATES));
        let var = swarm
            .add_variable("temperature", 1, DataType::Float, None)
            .unwrap();
        assert_eq!(swarm.channel(var).unwrap().name(), "temperature");
        assert!(matches!(
            swarm.add_variable("temperature", 1, DataType::Float, None),
            Err(SwarmError::Config(ConfigError::DuplicateName(_)))
        ));
        assert!(matches!(
            swarm.add_variable("empty", 0, DataType::Int, None),
            Err(SwarmError::Config(ConfigError::InvalidComponentCount { .. }))
        ));
        assert!(matches!(
            swarm.add_index_variable("material", 0, ProxyOptions::default()),
            Err(SwarmError::Config(ConfigError::InvalidCategoryCount(_)))
        ));
        let bad_degree = ProxyOptions {
            degree: 0,
            ..Default::default()
        };
        assert!(swarm
            .add_variable("bad", 1, DataType::Float, Some(bad_degree))
            .is_err());
        assert!(matches!(
            swarm.data(var),
            Err(StateError::NoTransaction(_))
        ));
    }

    #[test]
    fn test_populate() {
        let mut swarm = unit_swarm(2);
        let var = swarm
            .add_variable("v", 2, DataType::Float, Some(ProxyOptions::default()))
            .unwrap();
        swarm.populate(FillLayout::Gauss, 2).unwrap();
        assert_eq!(swarm.num_particles(), 16);
        assert_eq!(swarm.launch_point(), LaunchPoint::Uninitialized);
        let access = swarm.access(&[]).unwrap();
        assert_eq!(access.data(var).unwrap().len(), 32);
        let cells = access.int_data(VarId::CELL_ID).unwrap();
        assert_eq!(&cells[..4], &[0, 0, 0, 0]);
        assert_eq!(cells[15], 3);
        access.commit().unwrap();
    }

    #[test]
    fn test_add_particles_and_late_registration() {
        let mut swarm = unit_swarm(4);
        swarm
            .add_particles(&[DVec3::new(0.1, 0.1, 0.), DVec3::new(0.9, 0.1, 0.)])
            .unwrap();
        assert_eq!(swarm.num_particles(), 2);
        let var = swarm
            .add_variable("late", 1, DataType::Float, Some(ProxyOptions::default()))
            .unwrap();
        let proxy = swarm.proxy(var).unwrap().unwrap();
        assert!(proxy.values().iter().all(|v| *v == 0.));

        let access = swarm.access(&[]).unwrap();
        assert_eq!(access.int_data(VarId::CELL_ID).unwrap(), &[0, 3]);
        let launch = access.data(VarId::LAUNCH_POINT).unwrap();
        assert_approx_eq!(f64, launch[2], 0.9);
        drop(access);

        assert!(matches!(
            swarm.add_particles(&[DVec3::new(2., 0., 0.)]),
            Err(SwarmError::Location(LocationError::OutsideDomain { .. }))
        ));
    }

    #[test]
    fn test_points_of_unknown_or_int_variable() {
        let mut other = unit_swarm(2);
        let foreign = other
            .add_variable("foreign", 2, DataType::Float, None)
            .unwrap();
        let mut swarm = unit_swarm(2);
        swarm.add_particles(&[DVec3::new(0.25, 0.75, 0.)]).unwrap();
        assert!(matches!(
            swarm.points(foreign),
            Err(StateError::UnknownVariable(_))
        ));
        assert!(matches!(
            swarm.points(VarId::CELL_ID),
            Err(StateError::TypeMismatch { .. })
        ));
        assert_eq!(swarm.points(VarId::COORDINATES).unwrap().len(), 1);

        let mut access = swarm.access(&[VarId::CELL_ID]).unwrap();
        assert!(matches!(
            access.set_points(foreign, &[DVec3::ZERO]),
            Err(StateError::UnknownVariable(_))
        ));
        assert!(matches!(
            access.set_points(VarId::CELL_ID, &[DVec3::ZERO]),
            Err(StateError::TypeMismatch { .. })
        ));
        access.commit().unwrap();
        assert_eq!(swarm.positions(), vec![DVec3::new(0.25, 0.75, 0.)]);
    }

    #[test]
    fn test_project_from() {
        let mut swarm = unit_swarm(3);
        swarm.populate(FillLayout::Regular, 1).unwrap();
        let var = swarm
            .add_variable("x", 1, DataType::Float, Some(ProxyOptions::default()))
            .unwrap();
        let key = NodeKey::new(1, true).unwrap();
        let layout = swarm.mesh().nodes(key);
        let field = MeshField::from_fn("x", 1, &layout, |x| vec![x.x + 2. * x.y]).unwrap();
        swarm.project_from(var, &field).unwrap();

        let positions = swarm.positions();
        let access = swarm.access(&[]).unwrap();
        for (x, v) in positions.iter().zip(access.data(var).unwrap()) {
            assert_approx_eq!(f64, *v, x.x + 2. * x.y, epsilon = 1e-12);
        }
        access.commit().unwrap();

        let vector = MeshField::new("v", 2, &layout);
        assert!(matches!(
            swarm.project_from(var, &vector),
            Err(SwarmError::Config(ConfigError::ComponentMismatch { .. }))
        ));
    }

    #[test]
    fn test_proxy_stats() {
        let mut swarm = unit_swarm(2);
        let var = swarm
            .add_variable("one", 1, DataType::Float, Some(ProxyOptions::default()))
            .unwrap();
        swarm.populate(FillLayout::Gauss, 1).unwrap();
        let mut access = swarm.access(&[var]).unwrap();
        access.data_mut(var).unwrap().fill(1.);
        access.commit().unwrap();
        let stats = swarm.proxy_stats(var).unwrap().unwrap();
        assert_eq!(stats.size, 9);
        assert_approx_eq!(f64, stats.mean, 1.);
        assert_approx_eq!(f64, stats.min, 1.);
    }

    #[test]
    fn test_deform_relocates() {
        let mut swarm = unit_swarm(2);
        swarm.add_particles(&[DVec3::new(0.75, 0.25, 0.)]).unwrap();
        swarm
            .update_mesh(|mesh| mesh.deform(|v| DVec3::new(0.5 * v.x, v.y, 0.)))
            .unwrap_err();
        swarm.update_mesh(|mesh| mesh.deform(|v| DVec3::new(2. * v.x, v.y, 0.))).unwrap();
        let access = swarm.access(&[]).unwrap();
        assert_eq!(access.int_data(VarId::CELL_ID).unwrap(), &[1]);
    }
}
