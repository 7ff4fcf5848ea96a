//! The time-window coupling state machine.
//!
//! A scheme is parameterized by kind (explicit/implicit × serial/parallel)
//! and role (first/second participant). It is a blocking state machine
//! driven by the solver's `advance` calls: every exchange, collective and
//! verdict transfer happens inside `initialize`/`advance`, in a fixed
//! global order (iteration, then exchange in configuration order, then
//! direction).
//!
//! Serial kinds stagger the participants: the second participant receives
//! the first's data at the end of `initialize` and of each `advance`, so
//! its next solve always consumes the first's freshest send. That is the
//! only arrangement of "first sends, second receives, second computes,
//! second sends back" compatible with `advance` running after the solve.

use crate::com::Channel;
use crate::cplscheme::data::{DataKey, DataRegistry};
use crate::cplscheme::measure::{l2_distance, l2_norm, ConvergenceMeasure};
use crate::error::{CouplingError, Result};
use crate::intra::IntraComm;
use crate::m2n::{Constraint, DistributedCommunication};
use crate::mesh::{DataId, Mesh, MeshId, MeshStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Action tags the solver must fulfill at the right moments.
pub mod actions {
    pub const WRITE_INITIAL_DATA: &str = "write-initial-data";
    pub const WRITE_ITERATION_CHECKPOINT: &str = "write-iteration-checkpoint";
    pub const READ_ITERATION_CHECKPOINT: &str = "read-iteration-checkpoint";
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CouplingKind {
    SerialExplicit,
    ParallelExplicit,
    SerialImplicit,
    ParallelImplicit,
}

impl CouplingKind {
    pub fn is_implicit(self) -> bool {
        matches!(self, CouplingKind::SerialImplicit | CouplingKind::ParallelImplicit)
    }

    pub fn is_serial(self) -> bool {
        matches!(self, CouplingKind::SerialExplicit | CouplingKind::SerialImplicit)
    }
}

/// Which participant of the pair this scheme instance drives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    First,
    Second,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Initialized,
    Advancing,
    Finalized,
}

/// One configured exchange, resolved to runtime ids.
#[derive(Clone, Debug)]
pub struct ExchangePlan {
    pub mesh: MeshId,
    pub data: DataId,
    pub constraint: Constraint,
    pub initialize: bool,
    /// true when this participant is the sender
    pub outgoing: bool,
}

/// Static scheme parameters.
#[derive(Clone, Debug)]
pub struct SchemeSetup {
    pub kind: CouplingKind,
    pub role: Role,
    pub participant: String,
    pub window_size: f64,
    pub max_windows: usize,
    /// bound on implicit iterations per window; ignored by explicit kinds
    pub max_iterations: usize,
}

pub struct CouplingScheme {
    kind: CouplingKind,
    role: Role,
    participant: String,
    state: State,
    t: f64,
    window: usize,
    iteration: usize,
    window_size: f64,
    time_accum: f64,
    max_windows: usize,
    max_iterations: usize,
    exchanges: Vec<ExchangePlan>,
    measures: Vec<ConvergenceMeasure>,
    registry: DataRegistry,
    links: BTreeMap<MeshId, Box<dyn DistributedCommunication>>,
    /// master-master verdict channel; required on rank 0 of implicit schemes
    control: Option<Box<dyn Channel>>,
    intra: Arc<dyn IntraComm>,
    actions: HashSet<&'static str>,
    window_complete: bool,
}

impl CouplingScheme {
    pub fn new(
        setup: SchemeSetup,
        intra: Arc<dyn IntraComm>,
        control: Option<Box<dyn Channel>>,
    ) -> Self {
        CouplingScheme {
            kind: setup.kind,
            role: setup.role,
            participant: setup.participant,
            state: State::Uninitialized,
            t: 0.0,
            window: 0,
            iteration: 1,
            window_size: setup.window_size,
            time_accum: 0.0,
            max_windows: setup.max_windows,
            max_iterations: setup.max_iterations,
            exchanges: Vec::new(),
            measures: Vec::new(),
            registry: DataRegistry::new(),
            links: BTreeMap::new(),
            control,
            intra,
            actions: HashSet::new(),
            window_complete: false,
        }
    }

    /// Register an exchange; order of calls is the exchange order.
    pub fn add_exchange(&mut self, store: &MeshStore, plan: ExchangePlan) -> Result<()> {
        self.registry
            .register(store, plan.mesh, plan.data, plan.initialize)?;
        self.exchanges.push(plan);
        Ok(())
    }

    pub fn add_measure(&mut self, measure: ConvergenceMeasure) {
        self.measures.push(measure);
    }

    /// Attach the m2n link that carries this mesh's exchanges.
    pub fn add_link(&mut self, mesh: MeshId, link: Box<dyn DistributedCommunication>) {
        self.links.insert(mesh, link);
    }

    pub fn registry(&self) -> &DataRegistry {
        &self.registry
    }

    // --- status -------------------------------------------------------------

    pub fn state(&self) -> State {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn is_coupling_ongoing(&self) -> bool {
        self.state != State::Finalized
    }

    pub fn is_time_window_complete(&self) -> bool {
        self.window_complete
    }

    /// Largest solver step that stays inside the current window.
    pub fn max_dt(&self) -> f64 {
        self.window_size - self.time_accum
    }

    pub fn is_action_required(&self, tag: &str) -> bool {
        self.actions.contains(tag)
    }

    pub fn mark_action_fulfilled(&mut self, tag: &str) -> Result<()> {
        let Some(known) = [
            actions::WRITE_ITERATION_CHECKPOINT,
            actions::READ_ITERATION_CHECKPOINT,
        ]
        .into_iter()
        .find(|k| *k == tag) else {
            return Err(CouplingError::usage(
                &self.participant,
                format!("unknown action tag `{tag}`"),
            ));
        };
        if !self.actions.remove(known) {
            return Err(CouplingError::usage(
                &self.participant,
                format!("action `{tag}` was not required"),
            ));
        }
        Ok(())
    }

    // --- lifecycle ----------------------------------------------------------

    /// Exchange initial data and arm the first window.
    pub fn initialize(&mut self, store: &mut MeshStore) -> Result<()> {
        if self.state != State::Uninitialized {
            return Err(CouplingError::usage(
                &self.participant,
                "initialize() called twice",
            ));
        }
        if self.window_size <= 0.0 || self.max_windows == 0 {
            return Err(CouplingError::Config(
                "time window size and max windows must be positive".into(),
            ));
        }
        if self.kind.is_implicit() && self.intra.is_master() && self.control.is_none() {
            return Err(CouplingError::Config(
                "implicit coupling needs a master control channel".into(),
            ));
        }
        self.registry.initialize_buffers(store)?;

        // initial-data round: second sends first so the first can consume
        match self.role {
            Role::Second => {
                self.send_exchanges(store, |p| p.outgoing && p.initialize)?;
                self.receive_exchanges(store, |p| !p.outgoing && p.initialize)?;
            }
            Role::First => {
                self.receive_exchanges(store, |p| !p.outgoing && p.initialize)?;
                self.send_exchanges(store, |p| p.outgoing && p.initialize)?;
            }
        }

        // serial staggering: the second's first solve uses the first's
        // window-1 data, which the first sends in its first advance
        if self.kind.is_serial() && self.role == Role::Second {
            self.receive_exchanges(store, |p| !p.outgoing)?;
        }

        for key in self.registry.keys().collect::<Vec<_>>() {
            self.registry.update_iterate(store, key)?;
            if self.kind.is_implicit() {
                self.registry.store_checkpoint(store, key)?;
            }
        }
        if self.kind.is_implicit() {
            self.actions.insert(actions::WRITE_ITERATION_CHECKPOINT);
        }

        self.state = State::Initialized;
        log::debug!(
            "participant `{}`: coupling initialized ({:?}, {:?})",
            self.participant,
            self.kind,
            self.role
        );
        Ok(())
    }

    /// Drive the scheme after the solver finished a step of `computed_dt`.
    pub fn advance(&mut self, store: &mut MeshStore, computed_dt: f64) -> Result<()> {
        match self.state {
            State::Initialized | State::Advancing => {}
            _ => {
                return Err(CouplingError::usage(
                    &self.participant,
                    "advance() outside of an initialized coupling",
                ))
            }
        }
        let eps = self.window_size * 1e-10;
        if computed_dt <= 0.0 || computed_dt > self.max_dt() + eps {
            return Err(CouplingError::usage(
                &self.participant,
                format!(
                    "computed dt {computed_dt} exceeds the window remainder {}",
                    self.max_dt()
                ),
            ));
        }
        self.state = State::Advancing;
        self.time_accum += computed_dt;

        for plan in self.exchanges.clone() {
            if plan.outgoing {
                self.registry
                    .stage_substep(store, (plan.mesh, plan.data), plan.constraint)?;
            }
        }

        if self.time_accum < self.window_size - eps {
            // sub-cycling: nothing leaves this participant yet
            self.window_complete = false;
            return Ok(());
        }

        // publish the staged window values as the exchange payload
        for key in self.outgoing_keys() {
            self.registry.publish_staged(store, key)?;
        }

        if self.kind.is_implicit() {
            self.advance_implicit(store)
        } else {
            self.advance_explicit(store)
        }
    }

    /// Shut the scheme down; further advances are usage errors.
    pub fn finalize(&mut self) {
        if self.state != State::Finalized {
            log::debug!(
                "participant `{}`: finalizing after {} window(s)",
                self.participant,
                self.window
            );
        }
        self.state = State::Finalized;
    }

    // --- kind-specific advancement ------------------------------------------

    fn advance_explicit(&mut self, store: &mut MeshStore) -> Result<()> {
        match (self.kind.is_serial(), self.role) {
            (true, Role::First) => {
                self.send_exchanges(store, |p| p.outgoing)?;
                self.receive_exchanges(store, |p| !p.outgoing)?;
            }
            (true, Role::Second) => {
                self.send_exchanges(store, |p| p.outgoing)?;
            }
            (false, _) => {
                self.send_exchanges(store, |p| p.outgoing)?;
                self.receive_exchanges(store, |p| !p.outgoing)?;
            }
        }
        self.commit_window(store)?;
        if self.kind.is_serial() && self.role == Role::Second && self.state != State::Finalized {
            self.receive_exchanges(store, |p| !p.outgoing)?;
        }
        Ok(())
    }

    fn advance_implicit(&mut self, store: &mut MeshStore) -> Result<()> {
        let converged = match self.role {
            Role::First => {
                self.send_exchanges(store, |p| p.outgoing)?;
                self.receive_exchanges(store, |p| !p.outgoing)?;
                self.receive_verdict()?
            }
            Role::Second => {
                self.send_exchanges(store, |p| p.outgoing)?;
                if !self.kind.is_serial() {
                    self.receive_exchanges(store, |p| !p.outgoing)?;
                }
                let verdict = self.evaluate_measures(store)?;
                self.send_verdict(verdict)?;
                verdict
            }
        };

        let forced = self.iteration >= self.max_iterations;
        if converged || forced {
            if !converged {
                log::warn!(
                    "participant `{}`: window {} did not converge within {} iteration(s); committing anyway",
                    self.participant,
                    self.window + 1,
                    self.max_iterations
                );
            }
            self.commit_window(store)?;
            if self.kind.is_serial() && self.role == Role::Second && self.state != State::Finalized
            {
                self.receive_exchanges(store, |p| !p.outgoing)?;
            }
        } else {
            self.rollback(store)?;
            if self.kind.is_serial() && self.role == Role::Second {
                self.receive_exchanges(store, |p| !p.outgoing)?;
            }
        }
        Ok(())
    }

    /// Commit the window: rotate buffers, take checkpoints, advance time,
    /// and finalize when the last window is done.
    fn commit_window(&mut self, store: &mut MeshStore) -> Result<()> {
        for key in self.registry.keys().collect::<Vec<_>>() {
            if !self.is_outgoing(key) {
                // received fields rotate their history too
                self.registry
                    .stage_substep(store, key, Constraint::Consistent)?;
            }
            self.registry.swap(store, key)?;
            self.registry.reset_staging(key)?;
        }
        for measure in &mut self.measures {
            measure.reset_window();
        }
        self.t += self.window_size;
        self.window += 1;
        self.iteration = 1;
        self.time_accum = 0.0;
        self.window_complete = true;

        if self.kind.is_implicit() {
            for key in self.registry.keys().collect::<Vec<_>>() {
                self.registry.store_checkpoint(store, key)?;
            }
            self.actions.insert(actions::WRITE_ITERATION_CHECKPOINT);
        }

        if self.window >= self.max_windows {
            log::info!(
                "participant `{}`: coupling completed after {} window(s)",
                self.participant,
                self.window
            );
            self.state = State::Finalized;
        }
        Ok(())
    }

    /// Roll back to the window start: the solver repeats the window with
    /// the freshly received iterate.
    fn rollback(&mut self, store: &mut MeshStore) -> Result<()> {
        for key in self.registry.keys().collect::<Vec<_>>() {
            self.registry.update_iterate(store, key)?;
        }
        for key in self.outgoing_keys() {
            self.registry.restore_checkpoint(store, key)?;
            self.registry.reset_staging(key)?;
        }
        self.iteration += 1;
        self.time_accum = 0.0;
        self.window_complete = false;
        self.actions.insert(actions::READ_ITERATION_CHECKPOINT);
        Ok(())
    }

    // --- exchanges ----------------------------------------------------------

    fn outgoing_keys(&self) -> Vec<DataKey> {
        self.exchanges
            .iter()
            .filter(|p| p.outgoing)
            .map(|p| (p.mesh, p.data))
            .collect()
    }

    fn is_outgoing(&self, key: DataKey) -> bool {
        self.exchanges
            .iter()
            .any(|p| p.outgoing && (p.mesh, p.data) == key)
    }

    fn send_exchanges(
        &mut self,
        store: &MeshStore,
        select: impl Fn(&ExchangePlan) -> bool,
    ) -> Result<()> {
        for plan in self.exchanges.clone() {
            if !select(&plan) {
                continue;
            }
            let entry = self
                .registry
                .get(plan.mesh, plan.data)
                .ok_or(CouplingError::UnknownData {
                    mesh: plan.mesh,
                    data: plan.data,
                })?;
            let dim = entry.dimension;
            let mesh = store.mesh(plan.mesh)?;
            let values = mesh
                .data_by_id(plan.data)
                .ok_or(CouplingError::UnknownData {
                    mesh: plan.mesh,
                    data: plan.data,
                })?
                .values()
                .to_vec();
            let link = self
                .links
                .get_mut(&plan.mesh)
                .ok_or(CouplingError::MissingMesh(plan.mesh))?;
            link.send(mesh, &values, dim)?;
        }
        Ok(())
    }

    fn receive_exchanges(
        &mut self,
        store: &mut MeshStore,
        select: impl Fn(&ExchangePlan) -> bool,
    ) -> Result<()> {
        for plan in self.exchanges.clone() {
            if !select(&plan) {
                continue;
            }
            let entry = self
                .registry
                .get(plan.mesh, plan.data)
                .ok_or(CouplingError::UnknownData {
                    mesh: plan.mesh,
                    data: plan.data,
                })?;
            let dim = entry.dimension;
            let mesh = store.mesh(plan.mesh)?;
            let mut values = mesh
                .data_by_id(plan.data)
                .ok_or(CouplingError::UnknownData {
                    mesh: plan.mesh,
                    data: plan.data,
                })?
                .values()
                .to_vec();
            let link = self
                .links
                .get_mut(&plan.mesh)
                .ok_or(CouplingError::MissingMesh(plan.mesh))?;
            link.receive(mesh, &mut values, dim)?;
            store
                .mesh_mut(plan.mesh)?
                .data_by_id_mut(plan.data)
                .ok_or(CouplingError::UnknownData {
                    mesh: plan.mesh,
                    data: plan.data,
                })?
                .values_mut()
                .copy_from_slice(&values);
        }
        Ok(())
    }

    // --- convergence --------------------------------------------------------

    /// Evaluate every configured measure over the owned vertices, reducing
    /// the squared norms across the group. The verdict is the conjunction,
    /// decided on the master and broadcast to the group.
    fn evaluate_measures(&mut self, store: &MeshStore) -> Result<bool> {
        let mut local_sums = Vec::with_capacity(self.measures.len() * 2);
        for measure in &self.measures {
            let entry = self
                .registry
                .get(measure.mesh, measure.data)
                .ok_or(CouplingError::UnknownData {
                    mesh: measure.mesh,
                    data: measure.data,
                })?;
            let mesh = store.mesh(measure.mesh)?;
            let new = owned_slice(
                mesh,
                mesh.data_by_id(measure.data)
                    .ok_or(CouplingError::UnknownData {
                        mesh: measure.mesh,
                        data: measure.data,
                    })?
                    .values(),
                entry.dimension,
            );
            let old = owned_slice(mesh, entry.previous_iterate(), entry.dimension);
            let distance = l2_distance(&new, &old);
            let scale = l2_norm(&new);
            local_sums.push(distance * distance);
            local_sums.push(scale * scale);
        }
        let reduced = self.intra.reduce_sum_f64(&local_sums)?;

        let verdict = if self.intra.is_master() {
            let mut all = true;
            for (i, measure) in self.measures.iter_mut().enumerate() {
                let distance = reduced[2 * i].sqrt();
                let scale = reduced[2 * i + 1].sqrt();
                let ok = measure.check_distance(distance, scale, self.iteration);
                log::debug!(
                    "measure on data {:?}: distance {distance:.3e} -> {}",
                    measure.data,
                    if ok { "converged" } else { "not converged" }
                );
                all &= ok;
            }
            Some(all as u8)
        } else {
            None
        };
        Ok(crate::intra::broadcast_value::<u8>(&*self.intra, verdict)? != 0)
    }

    fn send_verdict(&mut self, verdict: bool) -> Result<()> {
        if let Some(chan) = self.control.as_deref_mut() {
            chan.send_bool(verdict)?;
        }
        Ok(())
    }

    fn receive_verdict(&mut self) -> Result<bool> {
        let verdict = if let Some(chan) = self.control.as_deref_mut() {
            Some(chan.recv_bool()? as u8)
        } else {
            None
        };
        Ok(crate::intra::broadcast_value::<u8>(&*self.intra, verdict)? != 0)
    }
}

/// Values of the owned vertices only, in local order.
fn owned_slice(mesh: &Mesh, values: &[f64], dim: usize) -> Vec<f64> {
    let mut out = Vec::new();
    for vertex in mesh.vertices() {
        if vertex.is_owner() {
            let i = vertex.id() * dim;
            out.extend_from_slice(&values[i..i + dim]);
        }
    }
    out
}
