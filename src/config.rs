//! Typed configuration records, as produced by an external parser.
//!
//! The structures mirror the configuration vocabulary of a coupled run:
//! participants with provided and received meshes, one m2n link per
//! participant pair, and a coupling-scheme block. [`CouplingConfig::validate`]
//! performs the load-time consistency checks; everything it rejects would
//! otherwise surface mid-run as a protocol error between the participants.

use crate::com::TransportKind;
use crate::cplscheme::{CouplingKind, Criterion};
use crate::error::{CouplingError, Result};
use crate::m2n::Constraint;
use crate::partition::GeometricFilter;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    pub name: String,
    /// scalar, or vector with the mesh's dimensionality
    pub kind: DataKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Scalar,
    Vector,
}

impl DataKind {
    pub fn dimension(self, mesh_dimensions: usize) -> usize {
        match self {
            DataKind::Scalar => 1,
            DataKind::Vector => mesh_dimensions,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshConfig {
    pub name: String,
    pub id: i32,
    pub dimensions: usize,
    #[serde(default)]
    pub flip_normals: bool,
    #[serde(default)]
    pub data: Vec<DataConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiveMeshConfig {
    /// name of a mesh provided by the peer
    pub mesh: String,
    pub from: String,
    pub safety_factor: f64,
    pub geometric_filter: GeometricFilter,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub name: String,
    #[serde(default)]
    pub provide_meshes: Vec<MeshConfig>,
    #[serde(default)]
    pub receive_meshes: Vec<ReceiveMeshConfig>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionKind {
    GatherScatter,
    PointToPoint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct M2nConfig {
    pub transport: TransportKind,
    pub distribution: DistributionKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub data: String,
    pub mesh: String,
    pub from: String,
    pub to: String,
    pub constraint: Constraint,
    #[serde(default)]
    pub initialize: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeasureConfig {
    pub data: String,
    pub mesh: String,
    pub criterion: Criterion,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CouplingSchemeConfig {
    pub kind: CouplingKind,
    pub first: String,
    pub second: String,
    pub max_time_windows: usize,
    pub time_window_size: f64,
    /// implicit kinds only
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub measures: Vec<MeasureConfig>,
}

fn default_max_iterations() -> usize {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CouplingConfig {
    pub participants: Vec<ParticipantConfig>,
    pub m2n: M2nConfig,
    pub scheme: CouplingSchemeConfig,
}

impl CouplingConfig {
    pub fn participant(&self, name: &str) -> Result<&ParticipantConfig> {
        self.participants
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| CouplingError::Config(format!("participant `{name}` is not configured")))
    }

    /// The other participant of the coupled pair.
    pub fn peer_of(&self, name: &str) -> Result<&ParticipantConfig> {
        if name == self.scheme.first {
            self.participant(&self.scheme.second)
        } else {
            self.participant(&self.scheme.first)
        }
    }

    fn provided_mesh(&self, name: &str) -> Option<(&ParticipantConfig, &MeshConfig)> {
        for p in &self.participants {
            if let Some(m) = p.provide_meshes.iter().find(|m| m.name == name) {
                return Some((p, m));
            }
        }
        None
    }

    /// Load-time consistency checks. Every rejected condition names the
    /// offending record.
    pub fn validate(&self) -> Result<()> {
        let cfg = |reason: String| Err(CouplingError::Config(reason));

        if self.participants.len() != 2 {
            return cfg(format!(
                "a coupled pair needs exactly 2 participants, got {}",
                self.participants.len()
            ));
        }
        if self.scheme.first == self.scheme.second {
            return cfg("scheme participants `first` and `second` must differ".into());
        }
        self.participant(&self.scheme.first)?;
        self.participant(&self.scheme.second)?;

        if self.scheme.time_window_size <= 0.0 {
            return cfg(format!(
                "time-window-size must be positive, got {}",
                self.scheme.time_window_size
            ));
        }
        if self.scheme.max_time_windows == 0 {
            return cfg("max-time-windows must be positive".into());
        }
        if self.scheme.kind.is_implicit() && self.scheme.max_iterations == 0 {
            return cfg("max-iterations must be positive for implicit coupling".into());
        }
        if !self.scheme.kind.is_implicit() && !self.scheme.measures.is_empty() {
            return cfg("convergence measures require an implicit scheme".into());
        }

        for p in &self.participants {
            for m in &p.provide_meshes {
                if m.dimensions != 2 && m.dimensions != 3 {
                    return cfg(format!(
                        "mesh `{}`: dimensionality must be 2 or 3, got {}",
                        m.name, m.dimensions
                    ));
                }
            }
            for r in &p.receive_meshes {
                let Some((provider, _)) = self.provided_mesh(&r.mesh) else {
                    return cfg(format!(
                        "participant `{}` receives unknown mesh `{}`",
                        p.name, r.mesh
                    ));
                };
                if provider.name != r.from || provider.name == p.name {
                    return cfg(format!(
                        "participant `{}` receives mesh `{}` from `{}`, but it is provided by `{}`",
                        p.name, r.mesh, r.from, provider.name
                    ));
                }
                if r.safety_factor < 0.0 {
                    return cfg(format!(
                        "mesh `{}`: safety factor must be non-negative",
                        r.mesh
                    ));
                }
            }
        }

        for e in &self.scheme.exchanges {
            if e.from == e.to {
                return cfg(format!("exchange of `{}` has identical from/to", e.data));
            }
            for side in [&e.from, &e.to] {
                self.participant(side)?;
            }
            let Some((provider, mesh)) = self.provided_mesh(&e.mesh) else {
                return cfg(format!("exchange references unknown mesh `{}`", e.mesh));
            };
            if mesh.data.iter().all(|d| d.name != e.data) {
                return cfg(format!(
                    "exchange references unknown data `{}` on mesh `{}`",
                    e.data, e.mesh
                ));
            }
            let consumer = if provider.name == e.from { &e.to } else { &e.from };
            let consumer = self.participant(consumer)?;
            if !consumer.receive_meshes.iter().any(|r| r.mesh == e.mesh) {
                return cfg(format!(
                    "participant `{}` exchanges over mesh `{}` without receiving it",
                    consumer.name, e.mesh
                ));
            }
        }

        for m in &self.scheme.measures {
            let Some((_, mesh)) = self.provided_mesh(&m.mesh) else {
                return cfg(format!("measure references unknown mesh `{}`", m.mesh));
            };
            if mesh.data.iter().all(|d| d.name != m.data) {
                return cfg(format!(
                    "measure references unknown data `{}` on mesh `{}`",
                    m.data, m.mesh
                ));
            }
        }
        Ok(())
    }
}
