//! Gather/scatter exchange: secondary ranks talk only to their own master,
//! the two masters exchange one array in global-index order.

use crate::com::Channel;
use crate::error::{CouplingError, Result};
use crate::intra::IntraComm;
use crate::m2n::DistributedCommunication;
use crate::mesh::Mesh;
use std::sync::Arc;

pub struct GatherScatter {
    intra: Arc<dyn IntraComm>,
    /// master-master channel; `None` on secondary ranks
    master_chan: Option<Box<dyn Channel>>,
}

impl GatherScatter {
    pub fn new(intra: Arc<dyn IntraComm>, master_chan: Option<Box<dyn Channel>>) -> Self {
        GatherScatter { intra, master_chan }
    }

    fn owned_slice(mesh: &Mesh, values: &[f64], dim: usize) -> Vec<f64> {
        let mut owned = Vec::new();
        for vertex in mesh.vertices() {
            if vertex.is_owner() {
                let i = vertex.id() * dim;
                owned.extend_from_slice(&values[i..i + dim]);
            }
        }
        owned
    }
}

impl DistributedCommunication for GatherScatter {
    fn send(&mut self, mesh: &Mesh, values: &[f64], dim: usize) -> Result<()> {
        if mesh.vertex_distribution().is_empty() {
            return Err(CouplingError::NotPartitioned(mesh.id()));
        }
        let owned = Self::owned_slice(mesh, values, dim);
        let parts = crate::intra::gather_pod::<f64>(&*self.intra, &owned)?;

        if let Some(chan) = self.master_chan.as_deref_mut() {
            // serialize in global-index order
            let n_global = mesh.global_number_of_vertices();
            let mut flat = vec![0.0f64; n_global * dim];
            let distribution = mesh.vertex_distribution();
            for (rank, part) in parts.iter().enumerate() {
                let globals = distribution.global.get(&rank).ok_or(
                    CouplingError::UnknownRemoteRank(rank),
                )?;
                crate::com::wire::expect_exact_len("gather", part.len(), globals.len() * dim)?;
                for (j, &g) in globals.iter().enumerate() {
                    flat[g * dim..(g + 1) * dim].copy_from_slice(&part[j * dim..(j + 1) * dim]);
                }
            }
            chan.send_f64s(&flat)?;
        }
        Ok(())
    }

    fn receive(&mut self, mesh: &Mesh, values: &mut [f64], dim: usize) -> Result<()> {
        if mesh.vertex_distribution().is_empty() {
            return Err(CouplingError::NotPartitioned(mesh.id()));
        }
        let parts = if let Some(chan) = self.master_chan.as_deref_mut() {
            let flat = chan.recv_f64s()?;
            let n_global = mesh.global_number_of_vertices();
            crate::com::wire::expect_exact_len(chan.peer(), flat.len(), n_global * dim)?;
            let distribution = mesh.vertex_distribution();
            let mut parts = Vec::with_capacity(self.intra.size());
            for rank in 0..self.intra.size() {
                let globals = distribution.global.get(&rank).ok_or(
                    CouplingError::UnknownRemoteRank(rank),
                )?;
                let mut part = Vec::with_capacity(globals.len() * dim);
                for &g in globals {
                    part.extend_from_slice(&flat[g * dim..(g + 1) * dim]);
                }
                parts.push(part);
            }
            Some(parts)
        } else {
            None
        };
        let mine = crate::intra::scatter_pod::<f64>(&*self.intra, parts)?;

        let locals = mesh
            .vertex_distribution()
            .local
            .get(&self.intra.rank())
            .cloned()
            .unwrap_or_default();
        crate::com::wire::expect_exact_len("scatter", mine.len(), locals.len() * dim)?;
        for (j, &l) in locals.iter().enumerate() {
            values[l * dim..(l + 1) * dim].copy_from_slice(&mine[j * dim..(j + 1) * dim]);
        }
        Ok(())
    }
}
