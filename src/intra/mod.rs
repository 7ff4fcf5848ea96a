//! Collective operations within one participant's process group.
//!
//! Rank 0 of a group is the master. Every collective is synchronizing, and
//! the caller guarantees that all ranks of the group call the same
//! collectives in the same order; the routines here do not detect a
//! mismatched sequence, they deadlock on one (by design, like any
//! message-passing runtime).
//!
//! Backends: [`SingleRank`] for serial participants, [`ThreadGroup`] for
//! in-process rank groups (tests, single-process runs), and an MPI-backed
//! group behind the `mpi-support` feature.

mod group;
#[cfg(feature = "mpi-support")]
mod mpi;

pub use group::ThreadGroup;
#[cfg(feature = "mpi-support")]
pub use mpi::MpiIntra;

use crate::error::{CouplingError, Result};
use bytemuck::Pod;

/// Collective byte operations over one participant's ranks.
///
/// Master-rooted semantics: `broadcast` and `scatter` take their payload on
/// the master (`None` elsewhere); `gather` and `reduce_sum_f64` deliver
/// their result on the master (empty elsewhere).
pub trait IntraComm: Send + Sync {
    /// Rank of this process within the group (0..size).
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// True on the group's master (rank 0).
    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Broadcast the master's payload to every rank.
    fn broadcast_bytes(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>>;

    /// Gather every rank's payload at the master, in rank order. Secondary
    /// ranks get an empty vector back.
    fn gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>>;

    /// Send slice `i` of the master's parts to rank `i`.
    fn scatter_bytes(&self, parts: Option<Vec<Vec<u8>>>) -> Result<Vec<u8>>;

    /// Element-wise sum of equal-length `f64` arrays, delivered on the
    /// master. Secondary ranks get an empty vector back.
    fn reduce_sum_f64(&self, vals: &[f64]) -> Result<Vec<f64>>;

    /// Synchronize all ranks of the group.
    fn barrier(&self);
}

/// Serial no-op group: one rank, identity collectives.
#[derive(Clone, Debug, Default)]
pub struct SingleRank;

impl IntraComm for SingleRank {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_bytes(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        payload.ok_or_else(|| missing_root_payload(0))
    }

    fn gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        Ok(vec![payload])
    }

    fn scatter_bytes(&self, parts: Option<Vec<Vec<u8>>>) -> Result<Vec<u8>> {
        let mut parts = parts.ok_or_else(|| missing_root_payload(0))?;
        if parts.len() != 1 {
            return Err(CouplingError::CollectiveSizeMismatch {
                rank: 0,
                expected: 1,
                got: parts.len(),
            });
        }
        Ok(parts.remove(0))
    }

    fn reduce_sum_f64(&self, vals: &[f64]) -> Result<Vec<f64>> {
        Ok(vals.to_vec())
    }

    fn barrier(&self) {}
}

fn missing_root_payload(rank: usize) -> CouplingError {
    CouplingError::CollectiveSizeMismatch {
        rank,
        expected: 1,
        got: 0,
    }
}

// --- typed wrappers ---------------------------------------------------------

/// Broadcast a typed slice from the master.
pub fn broadcast_pod<T: Pod>(comm: &dyn IntraComm, payload: Option<&[T]>) -> Result<Vec<T>> {
    let bytes = comm.broadcast_bytes(payload.map(|p| crate::com::wire::to_bytes(p).to_vec()))?;
    Ok(crate::com::wire::from_bytes(&bytes))
}

/// Gather typed slices at the master, in rank order.
pub fn gather_pod<T: Pod>(comm: &dyn IntraComm, payload: &[T]) -> Result<Vec<Vec<T>>> {
    let parts = comm.gather_bytes(crate::com::wire::to_bytes(payload).to_vec())?;
    Ok(parts
        .iter()
        .map(|b| crate::com::wire::from_bytes(b))
        .collect())
}

/// Scatter typed parts from the master; rank `i` receives part `i`.
pub fn scatter_pod<T: Pod>(comm: &dyn IntraComm, parts: Option<Vec<Vec<T>>>) -> Result<Vec<T>> {
    let raw = parts.map(|ps| {
        ps.iter()
            .map(|p| crate::com::wire::to_bytes(p).to_vec())
            .collect()
    });
    let bytes = comm.scatter_bytes(raw)?;
    Ok(crate::com::wire::from_bytes(&bytes))
}

/// Broadcast one value from the master.
pub fn broadcast_value<T: Pod>(comm: &dyn IntraComm, payload: Option<T>) -> Result<T> {
    let v = broadcast_pod(comm, payload.as_ref().map(std::slice::from_ref))?;
    v.into_iter().next().ok_or_else(|| missing_root_payload(comm.rank()))
}
