//! Solver-facing facade of one coupled participant.
//!
//! A [`Participant`] owns the mesh store, the coupling scheme and the m2n
//! links of one solver process group. The solver builds its meshes, writes
//! its fields, and drives the coupling through `initialize` / `advance` /
//! `finalize`; everything else (partition handshake, connection setup,
//! exchange ordering) happens behind this facade in a deterministic order
//! that matches the peer's.

use crate::com::{accept_connection, request_connection, Channel, TransportKind};
use crate::config::{CouplingConfig, DistributionKind, MeshConfig};
use crate::cplscheme::{ConvergenceMeasure, CouplingScheme, ExchangePlan, Role, SchemeSetup};
use crate::error::{CouplingError, Result};
use crate::intra::IntraComm;
use crate::m2n::{Constraint, DistributedCommunication, GatherScatter, PointToPoint};
use crate::mesh::{BoundingBox, DataId, Mesh, MeshId, MeshStore};
use crate::partition::{
    provided_communicate, provided_compute, received_communicate, received_compute,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Socket port layout per coupled pair: the control channel sits at the
/// configured port, the k-th exchanged mesh's master channel at `1 + k`,
/// and its point-to-point channels from `64 × (k + 1)` plus the accepting
/// rank. Local transports ignore the offsets.
const MESH_CHANNEL_BASE: u16 = 1;
const P2P_CHANNEL_BASE: u16 = 64;

pub struct Participant {
    name: String,
    config: CouplingConfig,
    store: MeshStore,
    intra: Arc<dyn IntraComm>,
    scheme: Option<CouplingScheme>,
    data_index: BTreeMap<DataId, MeshId>,
    /// this participant must fill initialize-flagged fields before
    /// `initialize()`; cleared by fulfilling the write-initial-data action
    initial_write_pending: bool,
}

impl Participant {
    /// Build the participant's meshes and data fields from the
    /// configuration. Does not communicate.
    pub fn new(
        name: impl Into<String>,
        config: CouplingConfig,
        intra: Arc<dyn IntraComm>,
    ) -> Result<Self> {
        let name = name.into();
        config.validate()?;
        let my_cfg = config.participant(&name)?.clone();
        let peer_cfg = config.peer_of(&name)?.clone();

        let mut store = MeshStore::new();
        let mut data_index = BTreeMap::new();
        for mesh_cfg in &my_cfg.provide_meshes {
            build_mesh(&mut store, mesh_cfg, &mut data_index)?;
        }
        for recv in &my_cfg.receive_meshes {
            let mesh_cfg = peer_cfg
                .provide_meshes
                .iter()
                .find(|m| m.name == recv.mesh)
                .ok_or_else(|| {
                    CouplingError::Config(format!("received mesh `{}` not found", recv.mesh))
                })?;
            build_mesh(&mut store, mesh_cfg, &mut data_index)?;
        }

        let initial_write_pending = config
            .scheme
            .exchanges
            .iter()
            .any(|e| e.initialize && e.from == name);

        Ok(Participant {
            name,
            config,
            store,
            intra,
            scheme: None,
            data_index,
            initial_write_pending,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &MeshStore {
        &self.store
    }

    // --- mesh construction API ----------------------------------------------

    pub fn get_mesh_id(&self, name: &str) -> Result<MeshId> {
        self.store
            .mesh_by_name(name)
            .map(Mesh::id)
            .ok_or_else(|| self.usage(format!("unknown mesh `{name}`")))
    }

    pub fn get_data_id(&self, name: &str, mesh: MeshId) -> Result<DataId> {
        self.store
            .mesh(mesh)?
            .data_by_name(name)
            .map(|d| d.id())
            .ok_or_else(|| self.usage(format!("unknown data `{name}` on mesh {mesh:?}")))
    }

    pub fn set_mesh_vertex(&mut self, mesh: MeshId, coords: [f64; 3]) -> Result<usize> {
        let m = self.store.mesh_mut(mesh)?;
        let id = m.create_vertex(coords);
        m.allocate_data_values();
        Ok(id)
    }

    /// Create vertices from a flat coordinate array (`dimensions` values
    /// per vertex) and return their local ids.
    pub fn set_mesh_vertices(&mut self, mesh: MeshId, coords: &[f64]) -> Result<Vec<usize>> {
        let dims = self.store.mesh(mesh)?.dimensions();
        if coords.len() % dims != 0 {
            return Err(self.usage(format!(
                "coordinate array of {} values is not a multiple of the dimensionality {dims}",
                coords.len()
            )));
        }
        let m = self.store.mesh_mut(mesh)?;
        let ids = coords
            .chunks_exact(dims)
            .map(|chunk| {
                let mut c = [0.0f64; 3];
                c[..dims].copy_from_slice(chunk);
                m.create_vertex(c)
            })
            .collect();
        m.allocate_data_values();
        Ok(ids)
    }

    pub fn set_mesh_edge(&mut self, mesh: MeshId, v0: usize, v1: usize) -> Result<usize> {
        self.store.mesh_mut(mesh)?.create_unique_edge(v0, v1)
    }

    pub fn set_mesh_triangle(
        &mut self,
        mesh: MeshId,
        e0: usize,
        e1: usize,
        e2: usize,
    ) -> Result<usize> {
        self.store.mesh_mut(mesh)?.create_triangle(e0, e1, e2)
    }

    pub fn set_mesh_quad(
        &mut self,
        mesh: MeshId,
        e0: usize,
        e1: usize,
        e2: usize,
        e3: usize,
    ) -> Result<usize> {
        self.store.mesh_mut(mesh)?.create_quad(e0, e1, e2, e3)
    }

    // --- lifecycle ----------------------------------------------------------

    /// Partition all exchanged meshes, connect the m2n links and run the
    /// scheme's initial data round. Returns the largest first solver step.
    pub fn initialize(&mut self) -> Result<f64> {
        if self.scheme.is_some() {
            return Err(self.usage("initialize() called twice".into()));
        }
        if self.initial_write_pending {
            log::warn!(
                "participant `{}`: initialize-flagged fields were not written before initialize()",
                self.name
            );
        }
        let am_first = self.name == self.config.scheme.first;
        let peer = self.config.peer_of(&self.name)?.name.clone();
        let my_cfg = self.config.participant(&self.name)?.clone();
        let peer_cfg = self.config.peer_of(&self.name)?.clone();
        let transport = self.config.m2n.transport.clone();
        let is_master = self.intra.is_master();

        // provided meshes: finalize local geometry
        for mesh_cfg in &my_cfg.provide_meshes {
            let mesh = self.store.mesh_mut(MeshId(mesh_cfg.id))?;
            mesh.allocate_data_values();
            mesh.compute_state();
            mesh.compute_bounding_box();
        }

        // region of interest: union of this rank's provided geometry
        let mut region = BoundingBox::new();
        for mesh_cfg in &my_cfg.provide_meshes {
            for vertex in self.store.mesh(MeshId(mesh_cfg.id))?.vertices() {
                region.expand_by(vertex.coords());
            }
        }

        // exchanged meshes in ascending id order, same on both sides
        enum MeshPart {
            Provide,
            Receive { safety_factor: f64, filter: crate::partition::GeometricFilter },
        }
        let mut parts: BTreeMap<MeshId, MeshPart> = BTreeMap::new();
        for mesh_cfg in &my_cfg.provide_meshes {
            if peer_cfg.receive_meshes.iter().any(|r| r.mesh == mesh_cfg.name) {
                parts.insert(MeshId(mesh_cfg.id), MeshPart::Provide);
            }
        }
        for recv in &my_cfg.receive_meshes {
            let id = self.get_mesh_id(&recv.mesh)?;
            parts.insert(
                id,
                MeshPart::Receive {
                    safety_factor: recv.safety_factor,
                    filter: recv.geometric_filter,
                },
            );
        }

        // control channel, then one master channel per mesh; both sides
        // establish in the same order or the socket backend deadlocks
        let control = if self.config.scheme.kind.is_implicit() && is_master {
            Some(self.pair_channel(&transport, am_first, &peer, "ctl", 0)?)
        } else {
            None
        };

        let mut links: BTreeMap<MeshId, Box<dyn DistributedCommunication>> = BTreeMap::new();
        for (index, (&mesh_id, part)) in parts.iter().enumerate() {
            let i_provide = matches!(part, MeshPart::Provide);
            let mut chan = if is_master {
                let tag = format!("m{}", mesh_id.0);
                Some(self.pair_channel(
                    &transport,
                    i_provide,
                    &peer,
                    &tag,
                    MESH_CHANNEL_BASE + index as u16,
                )?)
            } else {
                None
            };

            let maps = match part {
                MeshPart::Provide => {
                    provided_communicate(&mut self.store, mesh_id, &*self.intra, chan_as_deref_mut(&mut chan))?;
                    provided_compute(&self.store, mesh_id, &*self.intra, chan_as_deref_mut(&mut chan))?
                }
                MeshPart::Receive { safety_factor, filter } => {
                    let handshake = received_communicate(chan_as_deref_mut(&mut chan))?;
                    received_compute(
                        &mut self.store,
                        mesh_id,
                        handshake,
                        region,
                        *safety_factor,
                        *filter,
                        &*self.intra,
                        chan_as_deref_mut(&mut chan),
                    )?
                }
            };

            let link: Box<dyn DistributedCommunication> = match self.config.m2n.distribution {
                DistributionKind::GatherScatter => {
                    Box::new(GatherScatter::new(self.intra.clone(), chan))
                }
                DistributionKind::PointToPoint => {
                    drop(chan); // the masters' channel carried only the handshake
                    let constraint = self.mesh_constraint(mesh_id)?;
                    let base =
                        transport.with_port_offset(P2P_CHANNEL_BASE * (index as u16 + 1))?;
                    let rank = self.intra.rank();
                    if i_provide {
                        Box::new(PointToPoint::accept(
                            &base, &self.name, &peer, mesh_id, rank, maps, constraint,
                        )?)
                    } else {
                        Box::new(PointToPoint::request(
                            &base, &peer, &self.name, mesh_id, rank, maps, constraint,
                        )?)
                    }
                }
            };
            links.insert(mesh_id, link);
        }

        // the scheme, with exchanges resolved in configuration order
        let setup = SchemeSetup {
            kind: self.config.scheme.kind,
            role: if am_first { Role::First } else { Role::Second },
            participant: self.name.clone(),
            window_size: self.config.scheme.time_window_size,
            max_windows: self.config.scheme.max_time_windows,
            max_iterations: self.config.scheme.max_iterations,
        };
        let mut scheme = CouplingScheme::new(setup, self.intra.clone(), control);
        for (mesh_id, link) in links {
            scheme.add_link(mesh_id, link);
        }
        let exchanges = self.config.scheme.exchanges.clone();
        for e in &exchanges {
            let mesh = self.get_mesh_id(&e.mesh)?;
            let data = self.get_data_id(&e.data, mesh)?;
            scheme.add_exchange(
                &self.store,
                ExchangePlan {
                    mesh,
                    data,
                    constraint: e.constraint,
                    initialize: e.initialize,
                    outgoing: e.from == self.name,
                },
            )?;
        }
        let measures = self.config.scheme.measures.clone();
        for m in &measures {
            let mesh = self.get_mesh_id(&m.mesh)?;
            let data = self.get_data_id(&m.data, mesh)?;
            scheme.add_measure(ConvergenceMeasure::new(mesh, data, m.criterion.clone()));
        }

        scheme.initialize(&mut self.store)?;
        let max_dt = scheme.max_dt();
        self.scheme = Some(scheme);
        log::info!("participant `{}` initialized", self.name);
        Ok(max_dt)
    }

    /// Advance the coupling after a solver step. Returns the largest next
    /// solver step.
    pub fn advance(&mut self, computed_dt: f64) -> Result<f64> {
        let scheme = self
            .scheme
            .as_mut()
            .ok_or_else(|| CouplingError::usage(&self.name, "advance() before initialize()"))?;
        scheme.advance(&mut self.store, computed_dt)?;
        Ok(scheme.max_dt())
    }

    pub fn finalize(&mut self) {
        if let Some(scheme) = self.scheme.as_mut() {
            scheme.finalize();
        }
    }

    // --- status -------------------------------------------------------------

    pub fn is_coupling_ongoing(&self) -> bool {
        self.scheme.as_ref().is_some_and(CouplingScheme::is_coupling_ongoing)
    }

    pub fn is_time_window_complete(&self) -> bool {
        self.scheme
            .as_ref()
            .is_some_and(CouplingScheme::is_time_window_complete)
    }

    pub fn is_action_required(&self, tag: &str) -> bool {
        if tag == crate::cplscheme::actions::WRITE_INITIAL_DATA {
            return self.initial_write_pending;
        }
        self.scheme
            .as_ref()
            .is_some_and(|s| s.is_action_required(tag))
    }

    pub fn mark_action_fulfilled(&mut self, tag: &str) -> Result<()> {
        if tag == crate::cplscheme::actions::WRITE_INITIAL_DATA {
            if !self.initial_write_pending {
                return Err(self.usage("action `write-initial-data` was not required".into()));
            }
            self.initial_write_pending = false;
            return Ok(());
        }
        self.scheme
            .as_mut()
            .ok_or_else(|| CouplingError::usage(&self.name, "no active coupling"))?
            .mark_action_fulfilled(tag)
    }

    // --- data access --------------------------------------------------------

    /// Write `values` (vertex-major, `dimension` components each) into the
    /// field's slices at `vertex_ids`.
    pub fn write_block_vector_data(
        &mut self,
        data: DataId,
        vertex_ids: &[usize],
        values: &[f64],
    ) -> Result<()> {
        let (mesh_id, dim) = self.locate(data)?;
        if values.len() != vertex_ids.len() * dim {
            return Err(self.usage(format!(
                "write of {} values does not match {} vertices × dimension {dim}",
                values.len(),
                vertex_ids.len()
            )));
        }
        let mesh = self.store.mesh_mut(mesh_id)?;
        let n = mesh.vertices().len();
        let buffer = mesh
            .data_by_id_mut(data)
            .ok_or(CouplingError::UnknownData { mesh: mesh_id, data })?
            .values_mut();
        for (j, &v) in vertex_ids.iter().enumerate() {
            if v >= n {
                return Err(CouplingError::usage(
                    &self.name,
                    format!("vertex id {v} out of range for mesh {mesh_id:?}"),
                ));
            }
            buffer[v * dim..(v + 1) * dim].copy_from_slice(&values[j * dim..(j + 1) * dim]);
        }
        Ok(())
    }

    /// Read the field's slices at `vertex_ids` into `out`.
    pub fn read_block_vector_data(
        &self,
        data: DataId,
        vertex_ids: &[usize],
        out: &mut [f64],
    ) -> Result<()> {
        let (mesh_id, dim) = self.locate(data)?;
        if out.len() != vertex_ids.len() * dim {
            return Err(self.usage(format!(
                "read of {} values does not match {} vertices × dimension {dim}",
                out.len(),
                vertex_ids.len()
            )));
        }
        let mesh = self.store.mesh(mesh_id)?;
        let n = mesh.vertices().len();
        let buffer = mesh
            .data_by_id(data)
            .ok_or(CouplingError::UnknownData { mesh: mesh_id, data })?
            .values();
        for (j, &v) in vertex_ids.iter().enumerate() {
            if v >= n {
                return Err(CouplingError::usage(
                    &self.name,
                    format!("vertex id {v} out of range for mesh {mesh_id:?}"),
                ));
            }
            out[j * dim..(j + 1) * dim].copy_from_slice(&buffer[v * dim..(v + 1) * dim]);
        }
        Ok(())
    }

    pub fn write_block_scalar_data(
        &mut self,
        data: DataId,
        vertex_ids: &[usize],
        values: &[f64],
    ) -> Result<()> {
        self.require_scalar(data)?;
        self.write_block_vector_data(data, vertex_ids, values)
    }

    pub fn read_block_scalar_data(
        &self,
        data: DataId,
        vertex_ids: &[usize],
        out: &mut [f64],
    ) -> Result<()> {
        self.require_scalar(data)?;
        self.read_block_vector_data(data, vertex_ids, out)
    }

    // --- helpers ------------------------------------------------------------

    fn locate(&self, data: DataId) -> Result<(MeshId, usize)> {
        let mesh_id = *self
            .data_index
            .get(&data)
            .ok_or_else(|| self.usage(format!("unknown data id {data:?}")))?;
        let dim = self
            .store
            .mesh(mesh_id)?
            .data_by_id(data)
            .ok_or(CouplingError::UnknownData { mesh: mesh_id, data })?
            .dimension();
        Ok((mesh_id, dim))
    }

    fn require_scalar(&self, data: DataId) -> Result<()> {
        let (_, dim) = self.locate(data)?;
        if dim != 1 {
            return Err(self.usage(format!(
                "data {data:?} has dimension {dim}, expected scalar"
            )));
        }
        Ok(())
    }

    fn mesh_constraint(&self, mesh: MeshId) -> Result<Constraint> {
        let mesh_name = self.store.mesh(mesh)?.name().to_string();
        let mut constraints = self
            .config
            .scheme
            .exchanges
            .iter()
            .filter(|e| e.mesh == mesh_name)
            .map(|e| e.constraint);
        let first = constraints.next().ok_or_else(|| {
            CouplingError::Config(format!("no exchange configured for mesh `{mesh_name}`"))
        })?;
        if constraints.any(|c| c != first) {
            return Err(CouplingError::Config(format!(
                "point-to-point needs one constraint per mesh, `{mesh_name}` mixes them"
            )));
        }
        Ok(first)
    }

    /// One master-master channel of the pair; `i_accept` decides the side.
    fn pair_channel(
        &self,
        transport: &TransportKind,
        i_accept: bool,
        peer: &str,
        tag: &str,
        port_offset: u16,
    ) -> Result<Box<dyn Channel>> {
        let kind = transport.with_port_offset(port_offset)?;
        if i_accept {
            let acceptor = format!("{}.{tag}", self.name);
            let mut conn = accept_connection(&kind, &acceptor, peer, &[0])?;
            Ok(conn.channels.remove(&0).expect("accepted channel"))
        } else {
            let acceptor = format!("{peer}.{tag}");
            request_connection(&kind, &acceptor, &self.name, 0)
        }
    }

    fn usage(&self, reason: String) -> CouplingError {
        CouplingError::usage(&self.name, reason)
    }
}

/// Equivalent to `Option<Box<dyn Channel>>::as_deref_mut`, written out
/// manually: the stdlib version pins the trait object's elided lifetime to
/// `'static`, which makes the borrow outlive the later move of `chan`.
fn chan_as_deref_mut(chan: &mut Option<Box<dyn Channel>>) -> Option<&mut dyn Channel> {
    match chan {
        Some(b) => Some(&mut **b),
        None => None,
    }
}

fn build_mesh(
    store: &mut MeshStore,
    mesh_cfg: &MeshConfig,
    data_index: &mut BTreeMap<DataId, MeshId>,
) -> Result<()> {
    let mut mesh = Mesh::new(
        &mesh_cfg.name,
        mesh_cfg.dimensions,
        mesh_cfg.flip_normals,
        MeshId(mesh_cfg.id),
    )?;
    for data_cfg in &mesh_cfg.data {
        let data = mesh.create_data(&data_cfg.name, data_cfg.kind.dimension(mesh_cfg.dimensions))?;
        data_index.insert(data, MeshId(mesh_cfg.id));
    }
    store.insert(mesh);
    Ok(())
}
