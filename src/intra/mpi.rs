//! MPI-backed rank group (feature `mpi-support`).
//!
//! Collectives reuse the master-rooted point-to-point shape of the
//! in-process backend so all three backends stay behaviorally identical;
//! only the barrier maps to a native MPI collective.

use super::IntraComm;
use crate::error::{CouplingError, Result};
use mpi::collective::CommunicatorCollectives;
use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::{Communicator as _, SimpleCommunicator};

const COLLECTIVE_TAG: i32 = 0x0C11;

pub struct MpiIntra {
    _universe: Universe,
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

unsafe impl Send for MpiIntra {}
unsafe impl Sync for MpiIntra {}

impl MpiIntra {
    /// Initialize MPI and wrap the world communicator. One per process.
    pub fn initialize() -> Result<Self> {
        let universe = mpi::initialize().ok_or_else(|| {
            CouplingError::Config("MPI initialization failed (already initialized?)".to_string())
        })?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(Self {
            _universe: universe,
            world,
            rank,
            size,
        })
    }

    fn send_to(&self, dst: usize, bytes: &[u8]) {
        self.world
            .process_at_rank(dst as i32)
            .send_with_tag(bytes, COLLECTIVE_TAG);
    }

    fn recv_from(&self, src: usize) -> Vec<u8> {
        let (data, _status) = self
            .world
            .process_at_rank(src as i32)
            .receive_vec_with_tag::<u8>(COLLECTIVE_TAG);
        data
    }
}

impl IntraComm for MpiIntra {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast_bytes(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let out = if self.rank == 0 {
            let payload = payload.ok_or(CouplingError::CollectiveSizeMismatch {
                rank: 0,
                expected: 1,
                got: 0,
            })?;
            for dst in 1..self.size {
                self.send_to(dst, &payload);
            }
            payload
        } else {
            self.recv_from(0)
        };
        self.barrier();
        Ok(out)
    }

    fn gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let out = if self.rank == 0 {
            let mut parts = Vec::with_capacity(self.size);
            parts.push(payload);
            for src in 1..self.size {
                parts.push(self.recv_from(src));
            }
            parts
        } else {
            self.send_to(0, &payload);
            Vec::new()
        };
        self.barrier();
        Ok(out)
    }

    fn scatter_bytes(&self, parts: Option<Vec<Vec<u8>>>) -> Result<Vec<u8>> {
        let out = if self.rank == 0 {
            let mut parts = parts.ok_or(CouplingError::CollectiveSizeMismatch {
                rank: 0,
                expected: self.size,
                got: 0,
            })?;
            if parts.len() != self.size {
                return Err(CouplingError::CollectiveSizeMismatch {
                    rank: 0,
                    expected: self.size,
                    got: parts.len(),
                });
            }
            for (dst, part) in parts.iter().enumerate().skip(1) {
                self.send_to(dst, part);
            }
            parts.swap_remove(0)
        } else {
            self.recv_from(0)
        };
        self.barrier();
        Ok(out)
    }

    fn reduce_sum_f64(&self, vals: &[f64]) -> Result<Vec<f64>> {
        let parts = self.gather_bytes(crate::com::wire::to_bytes(vals).to_vec())?;
        if self.rank != 0 {
            return Ok(Vec::new());
        }
        let mut acc: Vec<f64> = crate::com::wire::from_bytes(&parts[0]);
        for (rank, part) in parts.iter().enumerate().skip(1) {
            let vs: Vec<f64> = crate::com::wire::from_bytes(part);
            if vs.len() != acc.len() {
                return Err(CouplingError::CollectiveSizeMismatch {
                    rank,
                    expected: acc.len() * 8,
                    got: part.len(),
                });
            }
            for (a, v) in acc.iter_mut().zip(&vs) {
                *a += v;
            }
        }
        Ok(acc)
    }

    fn barrier(&self) {
        self.world.barrier();
    }
}
