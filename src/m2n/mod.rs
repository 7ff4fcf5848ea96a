//! Mesh-to-mesh data exchange between two partitioned participants.
//!
//! Both implementations move a vertex-major `f64` array (`dim` components
//! per vertex) across the participant boundary, routed by the structures
//! the partition subsystem produced. [`GatherScatter`] funnels everything
//! through the two masters; [`PointToPoint`] opens direct channels between
//! the rank pairs named in the feedback map.

mod gather_scatter;
mod point_to_point;

pub use gather_scatter::GatherScatter;
pub use point_to_point::PointToPoint;

use crate::error::Result;
use crate::mesh::Mesh;
use serde::{Deserialize, Serialize};

/// Receiver-side accumulation policy, from the mapping configuration.
///
/// Consistent data is pointwise: a later sender overwrites (ranks are
/// processed in ascending order, so the tie-break is deterministic).
/// Conservative data is integral-preserving: duplicate arrivals add up.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constraint {
    Consistent,
    Conservative,
}

/// Data exchange between two already-partitioned meshes.
///
/// `values` is laid out vertex-major over the local vertices of `mesh`,
/// `dim` components each. `receive` blocks until everything expected has
/// arrived. Only owned vertices travel; ghost copies are the mapping
/// layer's concern.
pub trait DistributedCommunication: Send {
    fn send(&mut self, mesh: &Mesh, values: &[f64], dim: usize) -> Result<()>;

    fn receive(&mut self, mesh: &Mesh, values: &mut [f64], dim: usize) -> Result<()>;

    /// Capability probe: pre-connection establishment before the partition
    /// handshake. Not supported by the current implementations.
    fn supports_pre_connection(&self) -> bool {
        false
    }

    /// Capability probe: direct broadcast of a scalar to all connected
    /// ranks. Not supported by the current implementations.
    fn supports_broadcast(&self) -> bool {
        false
    }
}

/// Endpoint name of one rank's m2n attachment for a mesh.
pub(crate) fn endpoint(participant: &str, mesh: crate::mesh::MeshId, rank: usize) -> String {
    format!("{participant}.m{}.r{rank}", mesh.0)
}
