//! Mesh value types: vertices, edges, faces, field data, bounding boxes,
//! and the per-mesh routing structures the partition subsystem populates.

mod bounding_box;
mod data;
mod elements;
#[allow(clippy::module_inception)]
mod mesh;
mod store;
mod vertex;

pub use bounding_box::BoundingBox;
pub use data::{Data, DataId};
pub use elements::{Edge, Quad, Triangle};
pub use mesh::Mesh;
pub use store::{IndexRegistry, MeshStore};
pub use vertex::Vertex;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Id of a mesh, unique within a coupled run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub i32);

/// Which ranks own which vertices of a partitioned mesh.
///
/// `local[rank]` lists the rank's owned vertices by ascending local index;
/// `global[rank]` carries the matching global indices. The two tables are
/// index-aligned. Provided meshes could recover the global indices from the
/// offsets alone, received (filtered) meshes cannot, so the table is stored
/// explicitly for both.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexDistribution {
    pub local: BTreeMap<usize, Vec<usize>>,
    pub global: BTreeMap<usize, Vec<usize>>,
}

impl VertexDistribution {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Number of vertices owned by `rank`.
    pub fn owned_count(&self, rank: usize) -> usize {
        self.local.get(&rank).map_or(0, Vec::len)
    }

    /// Total owned vertices across the group.
    pub fn total_owned(&self) -> usize {
        self.local.values().map(Vec::len).sum()
    }
}
