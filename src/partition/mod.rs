//! Distributed mesh partitioning.
//!
//! One participant *provides* a mesh (its solver owns the vertices), the
//! peer *receives* a copy reduced to the locally relevant subset. The two
//! sides run a fixed master-master handshake:
//!
//! 1. provider gathers per-rank bounding boxes and the global mesh at its
//!    master and ships both (plus its vertex offsets) to the peer master;
//! 2. the receiver filters the mesh per rank, assigns deterministic
//!    owners, and builds its routing tables;
//! 3. the receiver feeds the per-rank communication maps back, which the
//!    provider master inverts and distributes to its own ranks.
//!
//! The resulting [`VertexDistribution`](crate::mesh::VertexDistribution),
//! vertex offsets and [`CommMaps`] are everything the m2n layer needs.
//! Partitioning is idempotent: re-running it on the same inputs yields
//! identical structures.

mod ownership;
mod provided;
mod received;

pub use ownership::assign_owners;
pub use provided::{provided_communicate, provided_compute};
pub use received::{received_communicate, received_compute, ReceivedHandshake};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Geometric reduction policy for a received mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeometricFilter {
    /// No reduction; every rank keeps the full mesh (global mappings).
    NoFilter,
    /// The master filters per receiver rank and ships only the slice.
    FilterFirst,
    /// The master broadcasts the full mesh; each rank filters locally.
    BroadcastFilter,
}

/// Per-rank routing produced by partitioning.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommMaps {
    /// remote rank → ordered global vertex indices exchanged with it
    pub comm_map: BTreeMap<usize, Vec<usize>>,
}

impl CommMaps {
    /// Remote ranks this rank exchanges data with.
    pub fn connected_ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.comm_map.keys().copied()
    }
}
