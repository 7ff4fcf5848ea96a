//! In-process rank group: ranks are threads sharing a mailbox grid.
//!
//! Collectives are realized over master-rooted point-to-point transfers with
//! a closing epoch barrier, so every collective synchronizes the group. The
//! shared state lives behind an `Arc` handed to each rank at construction;
//! independent groups in one process cannot interfere.

use super::IntraComm;
use crate::error::{CouplingError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

#[derive(Default)]
struct Mailbox {
    q: Mutex<VecDeque<Vec<u8>>>,
    cv: Condvar,
}

impl Mailbox {
    fn push(&self, msg: Vec<u8>) {
        self.q.lock().expect("mailbox poisoned").push_back(msg);
        self.cv.notify_all();
    }

    fn pop(&self) -> Vec<u8> {
        let mut q = self.q.lock().expect("mailbox poisoned");
        loop {
            if let Some(msg) = q.pop_front() {
                return msg;
            }
            q = self.cv.wait(q).expect("mailbox poisoned");
        }
    }
}

struct EpochBarrier {
    state: Mutex<(usize, usize)>, // (arrived, epoch)
    cv: Condvar,
    size: usize,
}

impl EpochBarrier {
    fn wait(&self) {
        let mut s = self.state.lock().expect("barrier poisoned");
        let epoch = s.1;
        s.0 += 1;
        if s.0 == self.size {
            s.0 = 0;
            s.1 += 1;
            self.cv.notify_all();
        } else {
            while s.1 == epoch {
                s = self.cv.wait(s).expect("barrier poisoned");
            }
        }
    }
}

struct GroupShared {
    size: usize,
    /// mailbox for (src, dst), indexed src * size + dst
    boxes: Vec<Mailbox>,
    barrier: EpochBarrier,
}

impl GroupShared {
    fn mailbox(&self, src: usize, dst: usize) -> &Mailbox {
        &self.boxes[src * self.size + dst]
    }
}

/// One rank's handle onto an in-process group.
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<GroupShared>,
}

impl ThreadGroup {
    /// Create a group of `size` ranks; hand one handle to each thread.
    pub fn create_group(size: usize) -> Vec<ThreadGroup> {
        assert!(size > 0, "group must have at least one rank");
        let shared = Arc::new(GroupShared {
            size,
            boxes: (0..size * size).map(|_| Mailbox::default()).collect(),
            barrier: EpochBarrier {
                state: Mutex::new((0, 0)),
                cv: Condvar::new(),
                size,
            },
        });
        (0..size)
            .map(|rank| ThreadGroup {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }
}

impl IntraComm for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast_bytes(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let out = if self.rank == 0 {
            let payload = payload.ok_or(CouplingError::CollectiveSizeMismatch {
                rank: 0,
                expected: 1,
                got: 0,
            })?;
            for dst in 1..self.shared.size {
                self.shared.mailbox(0, dst).push(payload.clone());
            }
            payload
        } else {
            self.shared.mailbox(0, self.rank).pop()
        };
        self.barrier();
        Ok(out)
    }

    fn gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let out = if self.rank == 0 {
            let mut parts = Vec::with_capacity(self.shared.size);
            parts.push(payload);
            for src in 1..self.shared.size {
                parts.push(self.shared.mailbox(src, 0).pop());
            }
            parts
        } else {
            self.shared.mailbox(self.rank, 0).push(payload);
            Vec::new()
        };
        self.barrier();
        Ok(out)
    }

    fn scatter_bytes(&self, parts: Option<Vec<Vec<u8>>>) -> Result<Vec<u8>> {
        let out = if self.rank == 0 {
            let mut parts = parts.ok_or(CouplingError::CollectiveSizeMismatch {
                rank: 0,
                expected: self.shared.size,
                got: 0,
            })?;
            if parts.len() != self.shared.size {
                return Err(CouplingError::CollectiveSizeMismatch {
                    rank: 0,
                    expected: self.shared.size,
                    got: parts.len(),
                });
            }
            for (dst, part) in parts.iter().enumerate().skip(1) {
                self.shared.mailbox(0, dst).push(part.clone());
            }
            parts.swap_remove(0)
        } else {
            self.shared.mailbox(0, self.rank).pop()
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
        self.shared.barrier.wait();
    }
}
