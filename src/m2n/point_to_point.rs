//! Direct rank-to-rank exchange along the feedback-map routing.
//!
//! Every connected rank pair holds its own channel; there is no master
//! bottleneck. Arrivals are resequenced by vertex global index, and
//! duplicate arrivals fuse by the configured constraint: conservative data
//! accumulates, consistent data takes the last writer with ranks processed
//! in ascending order.

use crate::com::{accept_connection, request_connection, Channel, TransportKind};
use crate::error::{CouplingError, Result};
use crate::m2n::{endpoint, Constraint, DistributedCommunication};
use crate::mesh::{Mesh, MeshId};
use crate::partition::CommMaps;
use std::collections::{BTreeMap, HashMap};

pub struct PointToPoint {
    channels: BTreeMap<usize, Box<dyn Channel>>,
    comm_map: BTreeMap<usize, Vec<usize>>,
    constraint: Constraint,
}

impl PointToPoint {
    /// Accept channels from every remote rank in the communication map.
    /// The accepting side is the mesh provider by convention; its peers
    /// call [`PointToPoint::request`]. Each incoming channel announces its
    /// vertex list, which must match this side's routing table.
    pub fn accept(
        kind: &TransportKind,
        my_name: &str,
        peer_name: &str,
        mesh: MeshId,
        my_rank: usize,
        maps: CommMaps,
        constraint: Constraint,
    ) -> Result<Self> {
        let kind = kind.with_port_offset(my_rank as u16)?;
        let remote_ranks: Vec<usize> = maps.connected_ranks().collect();
        let mut connection = accept_connection(
            &kind,
            &endpoint(my_name, mesh, my_rank),
            peer_name,
            &remote_ranks,
        )?;
        for (&rank, globals) in &maps.comm_map {
            let chan = connection.channel(rank)?;
            let announced: Vec<usize> = chan
                .recv_i32s()?
                .into_iter()
                .map(|g| g as usize)
                .collect();
            if &announced != globals {
                return Err(CouplingError::Protocol {
                    peer: chan.peer().to_string(),
                    expected: format!("{} shared vertices", globals.len()),
                    got: format!("{} shared vertices", announced.len()),
                });
            }
        }
        Ok(PointToPoint {
            channels: connection.channels,
            comm_map: maps.comm_map,
            constraint,
        })
    }

    /// Open channels to every remote rank in the communication map and
    /// announce the expected vertex list on each.
    pub fn request(
        kind: &TransportKind,
        peer_name: &str,
        my_name: &str,
        mesh: MeshId,
        my_rank: usize,
        maps: CommMaps,
        constraint: Constraint,
    ) -> Result<Self> {
        let mut channels: BTreeMap<usize, Box<dyn Channel>> = BTreeMap::new();
        for (&rank, globals) in &maps.comm_map {
            let kind = kind.with_port_offset(rank as u16)?;
            let mut chan =
                request_connection(&kind, &endpoint(peer_name, mesh, rank), my_name, my_rank)?;
            let announce: Vec<i32> = globals.iter().map(|&g| g as i32).collect();
            chan.send_i32s(&announce)?;
            channels.insert(rank, chan);
        }
        Ok(PointToPoint {
            channels,
            comm_map: maps.comm_map,
            constraint,
        })
    }

    fn global_to_local(mesh: &Mesh) -> HashMap<usize, usize> {
        mesh.vertices()
            .iter()
            .filter(|v| v.is_owner())
            .map(|v| (v.global_index(), v.id()))
            .collect()
    }
}

impl DistributedCommunication for PointToPoint {
    fn send(&mut self, mesh: &Mesh, values: &[f64], dim: usize) -> Result<()> {
        let locals = Self::global_to_local(mesh);
        for (&rank, globals) in &self.comm_map {
            let chan = self
                .channels
                .get_mut(&rank)
                .ok_or(CouplingError::UnknownRemoteRank(rank))?;
            let mut payload = Vec::with_capacity(globals.len() * dim);
            for &g in globals {
                let &l = locals.get(&g).ok_or(CouplingError::UnknownRemoteRank(rank))?;
                payload.extend_from_slice(&values[l * dim..(l + 1) * dim]);
            }
            chan.send_f64s(&payload)?;
        }
        Ok(())
    }

    fn receive(&mut self, mesh: &Mesh, values: &mut [f64], dim: usize) -> Result<()> {
        let locals = Self::global_to_local(mesh);
        // zero every slot that will be written so accumulation starts clean
        for globals in self.comm_map.values() {
            for &g in globals {
                if let Some(&l) = locals.get(&g) {
                    values[l * dim..(l + 1) * dim].fill(0.0);
                }
            }
        }
        // ascending rank order makes the consistent overwrite deterministic
        for (&rank, globals) in &self.comm_map {
            let chan = self
                .channels
                .get_mut(&rank)
                .ok_or(CouplingError::UnknownRemoteRank(rank))?;
            let payload = chan.recv_f64s()?;
            crate::com::wire::expect_exact_len(chan.peer(), payload.len(), globals.len() * dim)?;
            for (j, &g) in globals.iter().enumerate() {
                let &l = locals.get(&g).ok_or(CouplingError::UnknownRemoteRank(rank))?;
                let target = &mut values[l * dim..(l + 1) * dim];
                let incoming = &payload[j * dim..(j + 1) * dim];
                match self.constraint {
                    Constraint::Conservative => {
                        for (t, v) in target.iter_mut().zip(incoming) {
                            *t += v;
                        }
                    }
                    Constraint::Consistent => target.copy_from_slice(incoming),
                }
            }
        }
        Ok(())
    }
}
