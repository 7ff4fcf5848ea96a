//! # mesh-couple
//!
//! mesh-couple is a coupling runtime for partitioned multi-physics
//! simulation: two solver process groups advance their own equations and
//! exchange field data over surface meshes at synchronized time windows,
//! optionally iterating until convergence. Each solver links the library
//! in-process; instances on different solvers talk over ordered
//! point-to-point byte channels.
//!
//! ## Subsystems
//! - [`com`] — typed byte channels between participants (in-process and
//!   TCP backends) and the mesh handshake codecs
//! - [`intra`] — collective operations within one participant's rank group
//! - [`mesh`] — vertices, edges, faces, field data, bounding boxes and the
//!   per-mesh routing structures
//! - [`partition`] — bounding-box handshake, geometric filtering,
//!   deterministic ownership, feedback routing
//! - [`m2n`] — mesh-to-mesh data exchange (gather/scatter or
//!   point-to-point)
//! - [`cplscheme`] — coupling data buffers, convergence measures, and the
//!   time-window state machine
//! - [`participant`] — the solver-facing facade tying it all together
//!
//! ## Example
//! ```no_run
//! use mesh_couple::intra::SingleRank;
//! use mesh_couple::participant::Participant;
//! use std::sync::Arc;
//!
//! # fn run(config: mesh_couple::config::CouplingConfig) -> Result<(), mesh_couple::error::CouplingError> {
//! let mut fluid = Participant::new("Fluid", config, Arc::new(SingleRank))?;
//! let surface = fluid.get_mesh_id("Surface")?;
//! let forces = fluid.get_data_id("Forces", surface)?;
//! let ids = fluid.set_mesh_vertices(surface, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0])?;
//! let mut dt = fluid.initialize()?;
//! while fluid.is_coupling_ongoing() {
//!     fluid.write_block_vector_data(forces, &ids, &[0.0; 6])?;
//!     dt = fluid.advance(dt)?;
//! }
//! fluid.finalize();
//! # Ok(())
//! # }
//! ```

pub mod com;
pub mod config;
pub mod cplscheme;
pub mod error;
pub mod intra;
pub mod m2n;
pub mod mesh;
pub mod participant;
pub mod partition;

/// The most-used types in one import.
pub mod prelude {
    pub use crate::com::{Channel, TransportKind};
    pub use crate::config::CouplingConfig;
    pub use crate::cplscheme::{
        actions, ConvergenceMeasure, CouplingKind, CouplingScheme, Criterion, ExchangePlan, Role,
    };
    pub use crate::error::{CouplingError, Result};
    pub use crate::intra::{IntraComm, SingleRank, ThreadGroup};
    pub use crate::m2n::{Constraint, DistributedCommunication, GatherScatter, PointToPoint};
    pub use crate::mesh::{BoundingBox, Data, DataId, Mesh, MeshId, MeshStore, Vertex};
    pub use crate::participant::Participant;
    pub use crate::partition::GeometricFilter;
}
