#![allow(dead_code)]
//! Shared builders for two-participant test runs.
//!
//! Every scenario couples a fluid-like first participant (provides
//! `Surface`) with a solid-like second participant (receives it). Both run
//! single-rank on threads of one process over the in-process transport.
//! Participant names and mesh ids carry a per-test tag: the in-process
//! rendezvous is keyed by endpoint name, and the test binary runs its
//! tests concurrently.

use mesh_couple::com::TransportKind;
use mesh_couple::config::{
    CouplingConfig, CouplingSchemeConfig, DataConfig, DataKind, DistributionKind, ExchangeConfig,
    M2nConfig, MeasureConfig, MeshConfig, ParticipantConfig, ReceiveMeshConfig,
};
use mesh_couple::cplscheme::CouplingKind;
use mesh_couple::m2n::Constraint;
use mesh_couple::partition::GeometricFilter;

/// Capture crate logs in test output (`RUST_LOG=debug cargo test -- --nocapture`).
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const SURFACE: &str = "Surface";
pub const FORCES: &str = "Forces";
pub const DISPLACEMENTS: &str = "Displacements";

pub struct PairBuilder {
    pub tag: &'static str,
    pub kind: CouplingKind,
    pub distribution: DistributionKind,
    pub max_windows: usize,
    pub window_size: f64,
    pub max_iterations: usize,
    pub forces_constraint: Constraint,
    pub with_displacements: bool,
    pub measures: Vec<MeasureConfig>,
    pub mesh_id: i32,
}

impl PairBuilder {
    /// `tag` must be unique per test; `mesh_id` unique per test binary.
    pub fn new(tag: &'static str, kind: CouplingKind, mesh_id: i32) -> Self {
        PairBuilder {
            tag,
            kind,
            distribution: DistributionKind::GatherScatter,
            max_windows: 2,
            window_size: 1.0,
            max_iterations: 1,
            forces_constraint: Constraint::Consistent,
            with_displacements: false,
            measures: Vec::new(),
            mesh_id,
        }
    }

    pub fn fluid(&self) -> String {
        format!("Fluid-{}", self.tag)
    }

    pub fn solid(&self) -> String {
        format!("Solid-{}", self.tag)
    }

    pub fn build(&self) -> CouplingConfig {
        let mut data = vec![DataConfig {
            name: FORCES.into(),
            kind: DataKind::Scalar,
        }];
        let mut exchanges = vec![ExchangeConfig {
            data: FORCES.into(),
            mesh: SURFACE.into(),
            from: self.fluid(),
            to: self.solid(),
            constraint: self.forces_constraint,
            initialize: false,
        }];
        if self.with_displacements {
            data.push(DataConfig {
                name: DISPLACEMENTS.into(),
                kind: DataKind::Scalar,
            });
            exchanges.push(ExchangeConfig {
                data: DISPLACEMENTS.into(),
                mesh: SURFACE.into(),
                from: self.solid(),
                to: self.fluid(),
                constraint: self.forces_constraint,
                initialize: false,
            });
        }
        CouplingConfig {
            participants: vec![
                ParticipantConfig {
                    name: self.fluid(),
                    provide_meshes: vec![MeshConfig {
                        name: SURFACE.into(),
                        id: self.mesh_id,
                        dimensions: 3,
                        flip_normals: false,
                        data,
                    }],
                    receive_meshes: vec![],
                },
                ParticipantConfig {
                    name: self.solid(),
                    provide_meshes: vec![],
                    receive_meshes: vec![ReceiveMeshConfig {
                        mesh: SURFACE.into(),
                        from: self.fluid(),
                        safety_factor: 0.0,
                        geometric_filter: GeometricFilter::NoFilter,
                    }],
                },
            ],
            m2n: M2nConfig {
                transport: TransportKind::Local,
                distribution: self.distribution,
            },
            scheme: CouplingSchemeConfig {
                kind: self.kind,
                first: self.fluid(),
                second: self.solid(),
                max_time_windows: self.max_windows,
                time_window_size: self.window_size,
                max_iterations: self.max_iterations,
                exchanges,
                measures: self.measures.clone(),
            },
        }
    }
}

/// The two-vertex interface every scheme scenario uses.
pub fn two_vertex_coords() -> Vec<f64> {
    vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]
}

/// Run both participants to completion on separate threads.
pub fn run_pair<A, B, RA, RB>(fluid: A, solid: B) -> (RA, RB)
where
    A: FnOnce() -> RA + Send + 'static,
    B: FnOnce() -> RB + Send + 'static,
    RA: Send + 'static,
    RB: Send + 'static,
{
    let a = std::thread::spawn(fluid);
    let b = std::thread::spawn(solid);
    (
        a.join().expect("fluid panicked"),
        b.join().expect("solid panicked"),
    )
}
