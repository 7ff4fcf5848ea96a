//! Receiver side of the partition handshake.

use crate::com::mesh_exchange::{
    mesh_from_bytes, mesh_to_bytes, receive_bounding_boxes, receive_mesh, receive_rank_table,
    send_rank_table, BufferChannel,
};
use crate::com::Channel;
use crate::error::{CouplingError, Result};
use crate::intra::{broadcast_pod, gather_pod, IntraComm};
use crate::mesh::{BoundingBox, Mesh, MeshId, MeshStore, VertexDistribution};
use crate::partition::{assign_owners, CommMaps, GeometricFilter};
use std::collections::BTreeMap;

/// What the receiving master learns from the provider's master.
pub struct ReceivedHandshake {
    pub boxes: BTreeMap<usize, BoundingBox>,
    pub provider_offsets: Vec<usize>,
    pub global_mesh: Mesh,
}

/// Receive bounding boxes, provider offsets and the global mesh at the
/// master. Secondary ranks pass `None` and get `None`.
pub fn received_communicate(
    mut master_chan: Option<&mut dyn Channel>,
) -> Result<Option<ReceivedHandshake>> {
    let Some(chan) = master_chan.as_deref_mut() else {
        return Ok(None);
    };
    let boxes = receive_bounding_boxes(chan)?;
    let offsets = chan.recv_i32s()?;
    let global_mesh = receive_mesh(chan)?;
    log::debug!(
        "received mesh `{}`: {} global vertices from {} provider ranks",
        global_mesh.name(),
        global_mesh.vertices().len(),
        boxes.len()
    );
    Ok(Some(ReceivedHandshake {
        boxes,
        provider_offsets: offsets.into_iter().map(|o| o as usize).collect(),
        global_mesh,
    }))
}

/// Re-partition the received mesh among this participant's ranks.
///
/// `region` is the rank's region of interest (typically the bounding box of
/// its own provided geometry); it is inflated by `safety_factor` before any
/// comparison. The registered mesh under `mesh_id` is replaced by the
/// filtered copy, owners are assigned deterministically, and the routing
/// tables are fed back to the provider's master.
///
/// Returns this rank's communication map: provider rank → ordered global
/// indices expected from it.
pub fn received_compute(
    store: &mut MeshStore,
    mesh_id: MeshId,
    handshake: Option<ReceivedHandshake>,
    region: BoundingBox,
    safety_factor: f64,
    filter: GeometricFilter,
    intra: &dyn IntraComm,
    mut master_chan: Option<&mut dyn Channel>,
) -> Result<CommMaps> {
    let dims = store.mesh(mesh_id)?.dimensions();
    if let Some(hs) = &handshake {
        let mesh = store.mesh(mesh_id)?;
        if hs.global_mesh.dimensions() != dims {
            return Err(CouplingError::DimensionMismatch {
                mesh: mesh.name().to_string(),
                local: dims,
                remote: hs.global_mesh.dimensions(),
            });
        }
        if hs.global_mesh.id() != mesh_id {
            return Err(CouplingError::Protocol {
                peer: "partition handshake".to_string(),
                expected: format!("mesh id {}", mesh_id.0),
                got: format!("mesh id {}", hs.global_mesh.id().0),
            });
        }
    }

    // every rank needs the provider's offsets to route by owner rank
    let provider_offsets = broadcast_pod::<u64>(
        intra,
        handshake
            .as_ref()
            .map(|hs| {
                hs.provider_offsets
                    .iter()
                    .map(|&o| o as u64)
                    .collect::<Vec<u64>>()
            })
            .as_deref(),
    )?;
    let global_count = *provider_offsets.last().ok_or_else(|| {
        CouplingError::Protocol {
            peer: "partition handshake".to_string(),
            expected: "non-empty vertex offsets".to_string(),
            got: "empty".to_string(),
        }
    })? as usize;

    let mut my_region = region;
    my_region.inflate(safety_factor, dims);

    // geometric reduction
    let local = match filter {
        GeometricFilter::NoFilter | GeometricFilter::BroadcastFilter => {
            let bytes = intra
                .broadcast_bytes(handshake.as_ref().map(|hs| mesh_to_bytes(&hs.global_mesh)).transpose()?)?;
            let global_mesh = mesh_from_bytes(bytes)?;
            match filter {
                GeometricFilter::NoFilter => filter_mesh(&global_mesh, None, dims)?,
                _ => filter_mesh(&global_mesh, Some(&my_region), dims)?,
            }
        }
        GeometricFilter::FilterFirst => {
            let regions = gather_pod::<f64>(intra, &my_region.to_flat())?;
            let parts = if let Some(hs) = &handshake {
                let mut parts = Vec::with_capacity(intra.size());
                for flat in &regions {
                    let bb = BoundingBox::from_flat(flat);
                    parts.push(mesh_to_bytes(&filter_mesh(&hs.global_mesh, Some(&bb), dims)?)?);
                }
                Some(parts)
            } else {
                None
            };
            mesh_from_bytes(intra.scatter_bytes(parts)?)?
        }
    };

    if local.vertices().is_empty() {
        log::warn!(
            "rank {}: geometric filter left mesh `{}` empty; this rank exchanges nothing",
            intra.rank(),
            local.name()
        );
    }

    // candidate set of this rank, ascending by global index by construction
    let candidates: Vec<u64> = local
        .vertices()
        .iter()
        .map(|v| v.global_index() as u64)
        .collect();
    let gathered = gather_pod::<u64>(intra, &candidates)?;

    let owner_parts = if intra.is_master() {
        let table: BTreeMap<usize, Vec<usize>> = gathered
            .iter()
            .enumerate()
            .map(|(r, gs)| (r, gs.iter().map(|&g| g as usize).collect()))
            .collect();
        let covered: std::collections::BTreeSet<usize> =
            table.values().flatten().copied().collect();
        if covered.len() < global_count {
            log::warn!(
                "{} of {} vertices of mesh {mesh_id:?} were dropped by every rank's filter",
                global_count - covered.len(),
                global_count
            );
        }
        let flags = assign_owners(&table, global_count, intra.size());
        Some(
            (0..intra.size())
                .map(|r| {
                    flags
                        .get(&r)
                        .map(|fs| fs.iter().map(|&f| f as u8).collect())
                        .unwrap_or_default()
                })
                .collect::<Vec<Vec<u8>>>(),
        )
    } else {
        None
    };
    let my_flags = intra.scatter_bytes(owner_parts)?;

    // install the filtered copy and its owner flags
    {
        let mesh = store.mesh_mut(mesh_id)?;
        mesh.clear();
        mesh.add_mesh(&local)?;
        for (vertex, &flag) in mesh.vertices_mut().iter_mut().zip(&my_flags) {
            vertex.set_owner(flag != 0);
        }
        mesh.compute_bounding_box();
        mesh.allocate_data_values();
    }

    // distribution of owned vertices, assembled at the master
    let (owned_local, owned_global): (Vec<u64>, Vec<u64>) = {
        let mesh = store.mesh(mesh_id)?;
        let mut locals = Vec::new();
        let mut globals = Vec::new();
        for vertex in mesh.vertices() {
            if vertex.is_owner() {
                locals.push(vertex.id() as u64);
                globals.push(vertex.global_index() as u64);
            }
        }
        (locals, globals)
    };
    let mut buf = BufferChannel::empty();
    buf.send_i32(owned_local.len() as i32)?;
    buf.send_bytes(crate::com::wire::to_bytes(&owned_local))?;
    buf.send_bytes(crate::com::wire::to_bytes(&owned_global))?;
    let owned_parts = intra.gather_bytes(buf.into_bytes())?;

    let layout_bytes = if intra.is_master() {
        let mut distribution = VertexDistribution::default();
        for (rank, part) in owned_parts.into_iter().enumerate() {
            let mut buf = BufferChannel::from_bytes(part);
            let n = crate::com::wire::decode_count("owned table", buf.recv_i32()?)?;
            let locals: Vec<u64> = crate::com::wire::from_bytes(&buf.recv_bytes(n * 8)?);
            let globals: Vec<u64> = crate::com::wire::from_bytes(&buf.recv_bytes(n * 8)?);
            distribution
                .local
                .insert(rank, locals.into_iter().map(|v| v as usize).collect());
            distribution
                .global
                .insert(rank, globals.into_iter().map(|v| v as usize).collect());
        }
        let mut offsets = vec![0usize];
        for r in 0..intra.size() {
            offsets.push(offsets.last().unwrap() + distribution.owned_count(r));
        }
        let mut buf = BufferChannel::empty();
        buf.send_i32(global_count as i32)?;
        let offsets_i32: Vec<i32> = offsets.iter().map(|&o| o as i32).collect();
        buf.send_i32s(&offsets_i32)?;
        send_rank_table(&mut buf, &distribution.local)?;
        send_rank_table(&mut buf, &distribution.global)?;
        Some(buf.into_bytes())
    } else {
        None
    };
    let layout = intra.broadcast_bytes(layout_bytes)?;
    {
        let mut buf = BufferChannel::from_bytes(layout);
        let n_global = buf.recv_i32()? as usize;
        let offsets: Vec<usize> = buf.recv_i32s()?.into_iter().map(|o| o as usize).collect();
        let local = receive_rank_table(&mut buf)?;
        let global = receive_rank_table(&mut buf)?;
        let mesh = store.mesh_mut(mesh_id)?;
        mesh.set_global_number_of_vertices(n_global);
        mesh.set_vertex_offsets(offsets);
        mesh.set_vertex_distribution(VertexDistribution { local, global });
    }

    // communication map: every owned vertex is expected from the provider
    // rank whose offset range contains its global index
    let mut comm_map: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &g in &owned_global {
        let provider = provider_rank_of(g as usize, &provider_offsets);
        comm_map.entry(provider).or_default().push(g as usize);
    }

    // feedback to the provider's master
    let mut buf = BufferChannel::empty();
    send_rank_table(&mut buf, &comm_map)?;
    let feedback_parts = intra.gather_bytes(buf.into_bytes())?;
    if let Some(chan) = master_chan.as_deref_mut() {
        chan.send_i32(feedback_parts.len() as i32)?;
        for (rank, part) in feedback_parts.into_iter().enumerate() {
            chan.send_i32(rank as i32)?;
            let mut buf = BufferChannel::from_bytes(part);
            let table = receive_rank_table(&mut buf)?;
            send_rank_table(chan, &table)?;
        }
    }

    Ok(CommMaps { comm_map })
}

/// Owner rank of a global index under the provider's offsets.
fn provider_rank_of(global: usize, offsets: &[u64]) -> usize {
    offsets.partition_point(|&o| o as usize <= global).saturating_sub(1)
}

/// Copy `global` keeping only vertices inside `bb` (all of them when `bb`
/// is `None`), edges with both endpoints kept and faces with every edge
/// kept. Kept vertices are tagged; owner flags are reset for the receiving
/// side's own assignment.
fn filter_mesh(global: &Mesh, bb: Option<&BoundingBox>, dims: usize) -> Result<Mesh> {
    let mut out = Mesh::new(global.name(), global.dimensions(), false, global.id())?;
    let mut vertex_map: BTreeMap<usize, usize> = BTreeMap::new();
    for vertex in global.vertices() {
        let keep = bb.map_or(true, |bb| bb.contains(vertex.coords(), dims));
        if keep {
            let id = out.create_vertex(vertex.coords());
            let v = &mut out.vertices_mut()[id];
            v.set_global_index(vertex.global_index());
            v.set_owner(false);
            v.tag();
            vertex_map.insert(vertex.id(), id);
        }
    }
    let mut edge_map: BTreeMap<usize, usize> = BTreeMap::new();
    for edge in global.edges() {
        if let (Some(&v0), Some(&v1)) = (
            vertex_map.get(&edge.vertex(0)),
            vertex_map.get(&edge.vertex(1)),
        ) {
            edge_map.insert(edge.id(), out.create_edge(v0, v1)?);
        }
    }
    for triangle in global.triangles() {
        let es: Vec<Option<&usize>> = triangle.edges().iter().map(|e| edge_map.get(e)).collect();
        if let (Some(&e0), Some(&e1), Some(&e2)) = (es[0], es[1], es[2]) {
            out.create_triangle(e0, e1, e2)?;
        }
    }
    for quad in global.quads() {
        let es: Vec<Option<&usize>> = quad.edges().iter().map(|e| edge_map.get(e)).collect();
        if let (Some(&e0), Some(&e1), Some(&e2), Some(&e3)) = (es[0], es[1], es[2], es[3]) {
            out.create_quad(e0, e1, e2, e3)?;
        }
    }
    Ok(out)
}
