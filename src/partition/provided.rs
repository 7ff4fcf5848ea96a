//! Provider side of the partition handshake.

use crate::com::mesh_exchange::{
    mesh_from_bytes, mesh_to_bytes, receive_rank_table, send_bounding_boxes, send_mesh,
    BufferChannel,
};
use crate::com::Channel;
use crate::error::{CouplingError, Result};
use crate::intra::{broadcast_pod, gather_pod, IntraComm};
use crate::mesh::{BoundingBox, MeshId, MeshStore, VertexDistribution};
use crate::partition::CommMaps;
use std::collections::BTreeMap;

/// Establish the global vertex layout of a provided mesh and ship the
/// geometry to the peer's master.
///
/// Every rank of the providing participant calls this; only rank 0 passes
/// the master-master channel. Afterwards the mesh carries global indices,
/// owner flags (each provider rank owns its own vertices), the vertex
/// distribution and offsets.
pub fn provided_communicate(
    store: &mut MeshStore,
    mesh_id: MeshId,
    intra: &dyn IntraComm,
    mut master_chan: Option<&mut dyn Channel>,
) -> Result<()> {
    let rank = intra.rank();
    let n_local = store.mesh(mesh_id)?.vertices().len() as u64;

    // global layout: offsets are the prefix sums of per-rank vertex counts
    let counts = gather_pod::<u64>(intra, &[n_local])?;
    let offsets_master = intra.is_master().then(|| {
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        offsets.push(0u64);
        for part in &counts {
            offsets.push(offsets.last().unwrap() + part[0]);
        }
        offsets
    });
    let offsets = broadcast_pod::<u64>(intra, offsets_master.as_deref())?;
    let total = *offsets.last().unwrap() as usize;

    {
        let mesh = store.mesh_mut(mesh_id)?;
        let base = offsets[rank] as usize;
        for (i, vertex) in mesh.vertices_mut().iter_mut().enumerate() {
            vertex.set_global_index(base + i);
            vertex.set_owner(true);
        }
        mesh.tag_all();
        mesh.compute_bounding_box();
        mesh.set_vertex_offsets(offsets.iter().map(|&o| o as usize).collect());
        let mut distribution = VertexDistribution::default();
        for r in 0..intra.size() {
            let n = (offsets[r + 1] - offsets[r]) as usize;
            distribution.local.insert(r, (0..n).collect());
            distribution
                .global
                .insert(r, (offsets[r] as usize..offsets[r + 1] as usize).collect());
        }
        mesh.set_vertex_distribution(distribution);
        mesh.set_global_number_of_vertices(total);
        mesh.allocate_data_values();
    }

    // per-rank bounding boxes, gathered at the master
    let bb_flat = store.mesh(mesh_id)?.bounding_box().to_flat();
    let bbs = gather_pod::<f64>(intra, &bb_flat)?;

    // global mesh, assembled at the master in rank order
    let parts = intra.gather_bytes(mesh_to_bytes(store.mesh(mesh_id)?)?)?;

    if let Some(chan) = master_chan.as_deref_mut() {
        let template = store.mesh(mesh_id)?;
        let mut global =
            crate::mesh::Mesh::new(template.name(), template.dimensions(), false, mesh_id)?;
        for part in parts {
            let piece = mesh_from_bytes(part)?;
            global.add_mesh(&piece)?;
        }
        let boxes: BTreeMap<usize, BoundingBox> = bbs
            .iter()
            .enumerate()
            .map(|(r, flat)| (r, BoundingBox::from_flat(flat)))
            .collect();
        send_bounding_boxes(chan, &boxes)?;
        let offsets_i32: Vec<i32> = offsets.iter().map(|&o| o as i32).collect();
        chan.send_i32s(&offsets_i32)?;
        send_mesh(chan, &global)?;
        log::debug!(
            "provided mesh `{}`: shipped {} vertices in {} rank boxes",
            global.name(),
            total,
            intra.size()
        );
    }
    Ok(())
}

/// Receive the peer's feedback, invert it at the master and distribute the
/// per-rank send maps.
///
/// Returns this rank's communication map: receiver rank → ordered global
/// indices to send there.
pub fn provided_compute(
    store: &MeshStore,
    mesh_id: MeshId,
    intra: &dyn IntraComm,
    mut master_chan: Option<&mut dyn Channel>,
) -> Result<CommMaps> {
    store.mesh(mesh_id)?; // mesh must exist even though only routing is built

    let send_tables = if let Some(chan) = master_chan.as_deref_mut() {
        let raw = chan.recv_i32()?;
        let n_receivers = crate::com::wire::decode_count(chan.peer(), raw)?;
        // receiver rank -> (provider rank -> globals)
        let mut feedback: BTreeMap<usize, BTreeMap<usize, Vec<usize>>> = BTreeMap::new();
        for _ in 0..n_receivers {
            let receiver = chan.recv_i32()? as usize;
            feedback.insert(receiver, receive_rank_table(chan)?);
        }
        // invert: provider rank -> (receiver rank -> globals)
        let mut inverted: BTreeMap<usize, BTreeMap<usize, Vec<usize>>> = BTreeMap::new();
        for (&receiver, table) in &feedback {
            for (&provider, globals) in table {
                if provider >= intra.size() {
                    return Err(CouplingError::UnknownRemoteRank(provider));
                }
                inverted
                    .entry(provider)
                    .or_default()
                    .insert(receiver, globals.clone());
            }
        }
        let feedback_map: BTreeMap<usize, Vec<usize>> = inverted
            .iter()
            .map(|(&s, table)| (s, table.keys().copied().collect()))
            .collect();
        log::debug!("feedback map for mesh {mesh_id:?}: {feedback_map:?}");

        let mut parts = Vec::with_capacity(intra.size());
        for rank in 0..intra.size() {
            let table = inverted.remove(&rank).unwrap_or_default();
            let mut buf = BufferChannel::empty();
            crate::com::mesh_exchange::send_rank_table(&mut buf, &table)?;
            parts.push(buf.into_bytes());
        }
        Some(parts)
    } else {
        None
    };

    let mine = intra.scatter_bytes(send_tables)?;
    let mut buf = BufferChannel::from_bytes(mine);
    let comm_map = receive_rank_table(&mut buf)?;
    Ok(CommMaps { comm_map })
}
