//! Copying meshes and partition handshake tables between endpoints.
//!
//! The mesh handshake is fixed by the existing deployment protocol:
//! dimensionality, mesh name, mesh id, vertex count, coordinate array, then
//! connectivity and the per-vertex partition attributes. No magic number,
//! no version tag.

use crate::com::Channel;
use crate::error::{CouplingError, Result};
use crate::mesh::{BoundingBox, Mesh, MeshId};
use std::collections::BTreeMap;

pub fn send_mesh(chan: &mut dyn Channel, mesh: &Mesh) -> Result<()> {
    chan.send_i32(mesh.dimensions() as i32)?;
    chan.send_string(mesh.name())?;
    chan.send_i32(mesh.id().0)?;
    chan.send_i32(mesh.vertices().len() as i32)?;

    let dims = mesh.dimensions();
    let mut coords = Vec::with_capacity(mesh.vertices().len() * dims);
    for v in mesh.vertices() {
        coords.extend_from_slice(&v.coords()[..dims]);
    }
    chan.send_f64s(&coords)?;

    let mut edge_pairs = Vec::with_capacity(mesh.edges().len() * 2);
    for e in mesh.edges() {
        edge_pairs.push(e.vertex(0) as i32);
        edge_pairs.push(e.vertex(1) as i32);
    }
    chan.send_i32s(&edge_pairs)?;

    let mut tri_edges = Vec::with_capacity(mesh.triangles().len() * 3);
    for t in mesh.triangles() {
        tri_edges.extend(t.edges().map(|e| e as i32));
    }
    chan.send_i32s(&tri_edges)?;

    let mut quad_edges = Vec::with_capacity(mesh.quads().len() * 4);
    for q in mesh.quads() {
        quad_edges.extend(q.edges().map(|e| e as i32));
    }
    chan.send_i32s(&quad_edges)?;

    let globals: Vec<i32> = mesh.vertices().iter().map(|v| v.global_index() as i32).collect();
    chan.send_i32s(&globals)?;
    let owners: Vec<i32> = mesh.vertices().iter().map(|v| v.is_owner() as i32).collect();
    chan.send_i32s(&owners)?;
    let tags: Vec<i32> = mesh.vertices().iter().map(|v| v.is_tagged() as i32).collect();
    chan.send_i32s(&tags)?;
    Ok(())
}

pub fn receive_mesh(chan: &mut dyn Channel) -> Result<Mesh> {
    let dims = chan.recv_i32()?;
    let dims = usize::try_from(dims).map_err(|_| protocol(chan, "dimensionality", dims))?;
    let name = chan.recv_string()?;
    let id = chan.recv_i32()?;
    let n_vertices = chan.recv_i32()?;
    let n_vertices =
        usize::try_from(n_vertices).map_err(|_| protocol(chan, "vertex count", n_vertices))?;

    let mut mesh = Mesh::new(name, dims, false, MeshId(id))?;

    let coords = chan.recv_f64s()?;
    crate::com::wire::expect_exact_len(chan.peer(), coords.len(), n_vertices * dims)?;
    for chunk in coords.chunks_exact(dims) {
        let mut c = [0.0f64; 3];
        c[..dims].copy_from_slice(chunk);
        mesh.create_vertex(c);
    }

    let edge_pairs = chan.recv_i32s()?;
    for pair in edge_pairs.chunks_exact(2) {
        mesh.create_edge(pair[0] as usize, pair[1] as usize)?;
    }
    let tri_edges = chan.recv_i32s()?;
    for tri in tri_edges.chunks_exact(3) {
        mesh.create_triangle(tri[0] as usize, tri[1] as usize, tri[2] as usize)?;
    }
    let quad_edges = chan.recv_i32s()?;
    for quad in quad_edges.chunks_exact(4) {
        mesh.create_quad(
            quad[0] as usize,
            quad[1] as usize,
            quad[2] as usize,
            quad[3] as usize,
        )?;
    }

    let globals = chan.recv_i32s()?;
    let owners = chan.recv_i32s()?;
    let tags = chan.recv_i32s()?;
    crate::com::wire::expect_exact_len(chan.peer(), globals.len(), n_vertices)?;
    crate::com::wire::expect_exact_len(chan.peer(), owners.len(), n_vertices)?;
    crate::com::wire::expect_exact_len(chan.peer(), tags.len(), n_vertices)?;
    for (i, vertex) in mesh.vertices_mut().iter_mut().enumerate() {
        vertex.set_global_index(globals[i] as usize);
        vertex.set_owner(owners[i] != 0);
        if tags[i] != 0 {
            vertex.tag();
        }
    }
    Ok(mesh)
}

/// Send a rank-keyed bounding-box table.
pub fn send_bounding_boxes(
    chan: &mut dyn Channel,
    boxes: &BTreeMap<usize, BoundingBox>,
) -> Result<()> {
    let ranks: Vec<i32> = boxes.keys().map(|&r| r as i32).collect();
    chan.send_i32s(&ranks)?;
    let mut flat = Vec::with_capacity(boxes.len() * 6);
    for bb in boxes.values() {
        flat.extend_from_slice(&bb.to_flat());
    }
    chan.send_f64s(&flat)?;
    Ok(())
}

pub fn receive_bounding_boxes(chan: &mut dyn Channel) -> Result<BTreeMap<usize, BoundingBox>> {
    let ranks = chan.recv_i32s()?;
    let flat = chan.recv_f64s()?;
    crate::com::wire::expect_exact_len(chan.peer(), flat.len(), ranks.len() * 6)?;
    Ok(ranks
        .iter()
        .zip(flat.chunks_exact(6))
        .map(|(&r, chunk)| (r as usize, BoundingBox::from_flat(chunk)))
        .collect())
}

/// Send a rank-keyed index-list table (feedback and communication maps).
pub fn send_rank_table(chan: &mut dyn Channel, table: &BTreeMap<usize, Vec<usize>>) -> Result<()> {
    chan.send_i32(table.len() as i32)?;
    for (&rank, indices) in table {
        chan.send_i32(rank as i32)?;
        let ints: Vec<i32> = indices.iter().map(|&i| i as i32).collect();
        chan.send_i32s(&ints)?;
    }
    Ok(())
}

pub fn receive_rank_table(chan: &mut dyn Channel) -> Result<BTreeMap<usize, Vec<usize>>> {
    let raw = chan.recv_i32()?;
    let n = crate::com::wire::decode_count(chan.peer(), raw)?;
    let mut table = BTreeMap::new();
    for _ in 0..n {
        let rank = chan.recv_i32()? as usize;
        let indices = chan.recv_i32s()?;
        table.insert(rank, indices.into_iter().map(|i| i as usize).collect());
    }
    Ok(table)
}

// --- byte-buffer adapter ----------------------------------------------------

/// In-memory channel: the same codecs, writing into / reading from a byte
/// buffer. Lets the intra-participant collectives move meshes and tables
/// without a second serialization format.
pub struct BufferChannel {
    buf: Vec<u8>,
    read: usize,
}

impl BufferChannel {
    pub fn empty() -> Self {
        BufferChannel {
            buf: Vec::new(),
            read: 0,
        }
    }

    pub fn from_bytes(buf: Vec<u8>) -> Self {
        BufferChannel { buf, read: 0 }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Channel for BufferChannel {
    fn peer(&self) -> &str {
        "buffer"
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn recv_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if self.read + len > self.buf.len() {
            return Err(CouplingError::ChannelClosed {
                peer: "buffer".to_string(),
            });
        }
        let out = self.buf[self.read..self.read + len].to_vec();
        self.read += len;
        Ok(out)
    }
}

/// Serialize a mesh with the wire codecs.
pub fn mesh_to_bytes(mesh: &Mesh) -> Result<Vec<u8>> {
    let mut chan = BufferChannel::empty();
    send_mesh(&mut chan, mesh)?;
    Ok(chan.into_bytes())
}

/// Deserialize a mesh serialized by [`mesh_to_bytes`].
pub fn mesh_from_bytes(bytes: Vec<u8>) -> Result<Mesh> {
    let mut chan = BufferChannel::from_bytes(bytes);
    receive_mesh(&mut chan)
}

fn protocol(chan: &dyn Channel, what: &str, got: i32) -> CouplingError {
    CouplingError::Protocol {
        peer: chan.peer().to_string(),
        expected: format!("non-negative {what}"),
        got: got.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mesh() -> Mesh {
        let mut mesh = Mesh::new("Surface", 3, false, MeshId(3)).unwrap();
        let v0 = mesh.create_vertex([0.0, 0.0, 0.0]);
        let v1 = mesh.create_vertex([1.0, 0.0, 0.0]);
        let v2 = mesh.create_vertex([0.0, 1.0, 0.0]);
        let e0 = mesh.create_edge(v0, v1).unwrap();
        let e1 = mesh.create_edge(v1, v2).unwrap();
        let e2 = mesh.create_edge(v2, v0).unwrap();
        mesh.create_triangle(e0, e1, e2).unwrap();
        mesh.vertices_mut()[1].set_global_index(7);
        mesh.vertices_mut()[1].set_owner(true);
        mesh.vertices_mut()[2].tag();
        mesh
    }

    #[test]
    fn mesh_survives_the_wire() {
        let mesh = sample_mesh();
        let received = mesh_from_bytes(mesh_to_bytes(&mesh).unwrap()).unwrap();
        assert_eq!(received, mesh);
        assert_eq!(received.name(), "Surface");
        assert_eq!(received.id(), MeshId(3));
        assert_eq!(received.vertices()[1].global_index(), 7);
        assert!(received.vertices()[1].is_owner());
        assert!(received.vertices()[2].is_tagged());
        assert_eq!(received.triangles().len(), 1);
    }

    #[test]
    fn bounding_box_table_round_trip() {
        let mut bb0 = BoundingBox::new();
        bb0.expand_by([0.0, 0.0, 0.0]);
        bb0.expand_by([1.0, 1.0, 1.0]);
        let mut bb2 = BoundingBox::new();
        bb2.expand_by([-1.0, 0.0, 0.0]);
        let boxes: BTreeMap<usize, BoundingBox> = [(0, bb0), (2, bb2)].into_iter().collect();

        let mut chan = BufferChannel::empty();
        send_bounding_boxes(&mut chan, &boxes).unwrap();
        let mut chan = BufferChannel::from_bytes(chan.into_bytes());
        assert_eq!(receive_bounding_boxes(&mut chan).unwrap(), boxes);
    }

    #[test]
    fn rank_table_round_trip() {
        let table: BTreeMap<usize, Vec<usize>> =
            [(1, vec![0, 4, 9]), (3, vec![])].into_iter().collect();
        let mut chan = BufferChannel::empty();
        send_rank_table(&mut chan, &table).unwrap();
        let mut chan = BufferChannel::from_bytes(chan.into_bytes());
        assert_eq!(receive_rank_table(&mut chan).unwrap(), table);
    }
}
