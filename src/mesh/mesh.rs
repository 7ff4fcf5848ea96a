//! A named container of vertices, edges, faces and field data.
//!
//! Invariants: dimensionality is 2 or 3 and fixed for the mesh's lifetime;
//! element ids are dense; every face references edges already present.
//! After [`Mesh::allocate_data_values`], every data buffer holds
//! `|vertices| × dimension` values.

use crate::error::{CouplingError, Result};
use crate::mesh::{BoundingBox, Data, DataId, Edge, MeshId, Quad, Triangle, Vertex,
                  VertexDistribution};
use std::fmt;

#[derive(Debug)]
pub struct Mesh {
    name: String,
    id: MeshId,
    dimensions: usize,
    flip_normals: bool,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    triangles: Vec<Triangle>,
    quads: Vec<Quad>,
    data: Vec<Data>,
    vertex_distribution: VertexDistribution,
    vertex_offsets: Vec<usize>,
    global_number_of_vertices: usize,
    bounding_box: BoundingBox,
}

impl Mesh {
    pub fn new(name: impl Into<String>, dimensions: usize, flip_normals: bool, id: MeshId) -> Result<Self> {
        let name = name.into();
        if dimensions != 2 && dimensions != 3 {
            return Err(CouplingError::Config(format!(
                "mesh `{name}`: dimensionality must be 2 or 3, got {dimensions}"
            )));
        }
        if name.is_empty() {
            return Err(CouplingError::Config("mesh name must not be empty".into()));
        }
        Ok(Mesh {
            name,
            id,
            dimensions,
            flip_normals,
            vertices: Vec::new(),
            edges: Vec::new(),
            triangles: Vec::new(),
            quads: Vec::new(),
            data: Vec::new(),
            vertex_distribution: VertexDistribution::default(),
            vertex_offsets: Vec::new(),
            global_number_of_vertices: 0,
            bounding_box: BoundingBox::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn is_flip_normals(&self) -> bool {
        self.flip_normals
    }

    pub fn set_flip_normals(&mut self, flip: bool) {
        self.flip_normals = flip;
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertices_mut(&mut self) -> &mut [Vertex] {
        &mut self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut [Edge] {
        &mut self.edges
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    pub fn is_valid_vertex_id(&self, id: usize) -> bool {
        id < self.vertices.len()
    }

    pub fn is_valid_edge_id(&self, id: usize) -> bool {
        id < self.edges.len()
    }

    // --- construction -------------------------------------------------------

    /// Append a vertex; its id is the dense local index.
    pub fn create_vertex(&mut self, coords: [f64; 3]) -> usize {
        let id = self.vertices.len();
        self.vertices.push(Vertex::new(coords, id));
        id
    }

    pub fn create_edge(&mut self, v0: usize, v1: usize) -> Result<usize> {
        if !self.is_valid_vertex_id(v0) || !self.is_valid_vertex_id(v1) {
            return Err(self.invariant(format!("edge references unknown vertex ({v0}, {v1})")));
        }
        let id = self.edges.len();
        self.edges.push(Edge::new([v0, v1], id));
        Ok(id)
    }

    /// Return the existing edge over `{v0, v1}` or create a new one.
    pub fn create_unique_edge(&mut self, v0: usize, v1: usize) -> Result<usize> {
        let found = self.edges.iter().find(|e| {
            let vs = e.vertices();
            (vs[0] == v0 && vs[1] == v1) || (vs[0] == v1 && vs[1] == v0)
        });
        match found {
            Some(e) => Ok(e.id()),
            None => self.create_edge(v0, v1),
        }
    }

    pub fn create_triangle(&mut self, e0: usize, e1: usize, e2: usize) -> Result<usize> {
        for &e in &[e0, e1, e2] {
            if !self.is_valid_edge_id(e) {
                return Err(self.invariant(format!("triangle references unknown edge {e}")));
            }
        }
        let (a, b, c) = (&self.edges[e0], &self.edges[e1], &self.edges[e2]);
        if !(a.connected_to(b) && b.connected_to(c) && c.connected_to(a)) {
            return Err(self.invariant("triangle edges are not connected".into()));
        }
        // vertex loop: both vertices of e0, then the vertex of e1 not on e0
        let [v0, v1] = a.vertices();
        let v2 = b
            .vertices()
            .into_iter()
            .find(|v| *v != v0 && *v != v1)
            .ok_or_else(|| self.invariant("degenerate triangle".into()))?;
        let id = self.triangles.len();
        self.triangles.push(Triangle::new([e0, e1, e2], [v0, v1, v2], id));
        Ok(id)
    }

    /// Create a quad from four edges in arbitrary order. The edges are
    /// reordered into a closed loop and the vertex loop is derived from it.
    pub fn create_quad(&mut self, e0: usize, e1: usize, e2: usize, e3: usize) -> Result<usize> {
        for &e in &[e0, e1, e2, e3] {
            if !self.is_valid_edge_id(e) {
                return Err(self.invariant(format!("quad references unknown edge {e}")));
            }
        }
        let mut edge_ids = [e0, e1, e2, e3];
        let vertex_ids = self.quad_edge_order(&mut edge_ids)?;
        let id = self.quads.len();
        self.quads.push(Quad::new(edge_ids, vertex_ids, id));
        Ok(id)
    }

    // --- data ---------------------------------------------------------------

    /// Create a data field on this mesh. Field names are unique per mesh;
    /// ids are unique across all data.
    pub fn create_data(&mut self, name: impl Into<String>, dimension: usize) -> Result<DataId> {
        let name = name.into();
        if self.data.iter().any(|d| d.name() == name) {
            return Err(CouplingError::Config(format!(
                "data `{name}` cannot be created twice for mesh `{}`",
                self.name
            )));
        }
        let data = Data::new(name, dimension);
        let id = data.id();
        self.data.push(data);
        Ok(id)
    }

    pub fn data(&self) -> &[Data] {
        &self.data
    }

    pub fn data_by_id(&self, id: DataId) -> Option<&Data> {
        self.data.iter().find(|d| d.id() == id)
    }

    pub fn data_by_id_mut(&mut self, id: DataId) -> Option<&mut Data> {
        self.data.iter_mut().find(|d| d.id() == id)
    }

    pub fn data_by_name(&self, name: &str) -> Option<&Data> {
        self.data.iter().find(|d| d.name() == name)
    }

    /// Resize every data buffer to `|vertices| × dimension`, zero-filling
    /// newly allocated entries and shrinking oversized buffers.
    pub fn allocate_data_values(&mut self) {
        let n = self.vertices.len();
        for data in &mut self.data {
            let expected = n * data.dimension();
            data.values_mut().resize(expected, 0.0);
            log::debug!(
                "data `{}` on mesh `{}` now has {} values",
                data.name(),
                self.name,
                expected
            );
        }
    }

    /// Values of the owned vertices only, vertex-major, in local order.
    pub fn owned_vertex_data(&self, data_id: DataId) -> Result<Vec<f64>> {
        let data = self.data_by_id(data_id).ok_or(CouplingError::UnknownData {
            mesh: self.id,
            data: data_id,
        })?;
        let dim = data.dimension();
        let mut owned = Vec::new();
        for (index, vertex) in self.vertices.iter().enumerate() {
            if vertex.is_owner() {
                owned.extend_from_slice(&data.values()[index * dim..(index + 1) * dim]);
            }
        }
        Ok(owned)
    }

    // --- geometry -----------------------------------------------------------

    pub fn compute_bounding_box(&mut self) {
        let mut bb = BoundingBox::new();
        for vertex in &self.vertices {
            bb.expand_by(vertex.coords());
        }
        self.bounding_box = bb;
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    /// Compute area-weighted normals on faces, accumulate them into edges
    /// and vertices, then normalize. Meshes without faces keep zero normals.
    pub fn compute_state(&mut self) {
        let size_2d_faces = self.edges.len();
        let size_3d_faces = self.triangles.len() + self.quads.len();
        if self.dimensions == 2 && size_2d_faces == 0 {
            return;
        }
        if self.dimensions == 3 && size_3d_faces == 0 {
            return;
        }
        let flip = if self.flip_normals { -1.0 } else { 1.0 };

        if self.dimensions == 2 {
            for e in 0..self.edges.len() {
                let [a, b] = self.edges[e].vertices();
                let pa = self.vertices[a].coords();
                let pb = self.vertices[b].coords();
                // edge-length-weighted normal, rotated edge vector
                let weighted = [flip * (pb[1] - pa[1]), flip * (pa[0] - pb[0]), 0.0];
                self.edges[e].set_normal(normalized(weighted));
                for &v in &[a, b] {
                    let new_normal = add(self.vertices[v].normal(), weighted);
                    self.vertices[v].set_normal(new_normal);
                }
            }
        } else {
            for t in 0..self.triangles.len() {
                let vs = self.triangles[t].vertices();
                let p0 = self.vertices[vs[0]].coords();
                let p1 = self.vertices[vs[1]].coords();
                let p2 = self.vertices[vs[2]].coords();
                let weighted = scale(cross(sub(p1, p0), sub(p2, p0)), 0.5 * flip);
                for i in 0..3 {
                    let e = self.triangles[t].edge(i);
                    let new_edge_normal = add(self.edges[e].normal(), weighted);
                    self.edges[e].set_normal(new_edge_normal);
                    let v = vs[i];
                    let new_vertex_normal = add(self.vertices[v].normal(), weighted);
                    self.vertices[v].set_normal(new_vertex_normal);
                }
            }
            for q in 0..self.quads.len() {
                let vs = self.quads[q].vertices();
                let p0 = self.vertices[vs[0]].coords();
                let p1 = self.vertices[vs[1]].coords();
                let p2 = self.vertices[vs[2]].coords();
                let p3 = self.vertices[vs[3]].coords();
                // diagonal cross product, assuming a planar quad
                let weighted = scale(cross(sub(p2, p0), sub(p3, p1)), 0.5 * flip);
                for i in 0..4 {
                    let e = self.quads[q].edge(i);
                    let new_edge_normal = add(self.edges[e].normal(), weighted);
                    self.edges[e].set_normal(new_edge_normal);
                    let v = vs[i];
                    let new_vertex_normal = add(self.vertices[v].normal(), weighted);
                    self.vertices[v].set_normal(new_vertex_normal);
                }
            }
            // an edge can lack an adjacent face after filtering
            for e in 0..self.edges.len() {
                let n = normalized(self.edges[e].normal());
                self.edges[e].set_normal(n);
            }
        }

        // a vertex can lack an adjacent edge after filtering
        for v in 0..self.vertices.len() {
            let n = normalized(self.vertices[v].normal());
            self.vertices[v].set_normal(n);
        }
    }

    // --- partitioning structures -------------------------------------------

    pub fn vertex_distribution(&self) -> &VertexDistribution {
        &self.vertex_distribution
    }

    pub fn set_vertex_distribution(&mut self, distribution: VertexDistribution) {
        self.vertex_distribution = distribution;
    }

    pub fn vertex_offsets(&self) -> &[usize] {
        &self.vertex_offsets
    }

    pub fn set_vertex_offsets(&mut self, offsets: Vec<usize>) {
        self.vertex_offsets = offsets;
    }

    pub fn global_number_of_vertices(&self) -> usize {
        self.global_number_of_vertices
    }

    pub fn set_global_number_of_vertices(&mut self, n: usize) {
        self.global_number_of_vertices = n;
    }

    pub fn tag_all(&mut self) {
        for vertex in &mut self.vertices {
            vertex.tag();
        }
    }

    // --- whole-mesh operations ----------------------------------------------

    /// Drop all elements and reset data buffers; data fields themselves and
    /// the partition structures are kept.
    pub fn clear(&mut self) {
        self.quads.clear();
        self.triangles.clear();
        self.edges.clear();
        self.vertices.clear();
        for data in &mut self.data {
            data.values_mut().clear();
        }
    }

    /// Merge another mesh's elements into this one, remapping ids.
    /// Vertex global indices, tags and owner flags are preserved.
    pub fn add_mesh(&mut self, delta: &Mesh) -> Result<()> {
        if self.dimensions != delta.dimensions {
            return Err(CouplingError::DimensionMismatch {
                mesh: self.name.clone(),
                local: self.dimensions,
                remote: delta.dimensions,
            });
        }
        let mut vertex_map = std::collections::BTreeMap::new();
        for vertex in delta.vertices() {
            let id = self.create_vertex(vertex.coords());
            let v = &mut self.vertices[id];
            v.set_global_index(vertex.global_index());
            if vertex.is_tagged() {
                v.tag();
            }
            v.set_owner(vertex.is_owner());
            vertex_map.insert(vertex.id(), id);
        }
        let mut edge_map = std::collections::BTreeMap::new();
        for edge in delta.edges() {
            // resolve through the new mesh's ids, which may differ
            let v0 = vertex_map[&edge.vertex(0)];
            let v1 = vertex_map[&edge.vertex(1)];
            let id = self.create_edge(v0, v1)?;
            edge_map.insert(edge.id(), id);
        }
        if self.dimensions == 3 {
            for triangle in delta.triangles() {
                self.create_triangle(
                    edge_map[&triangle.edge(0)],
                    edge_map[&triangle.edge(1)],
                    edge_map[&triangle.edge(2)],
                )?;
            }
            for quad in delta.quads() {
                self.create_quad(
                    edge_map[&quad.edge(0)],
                    edge_map[&quad.edge(1)],
                    edge_map[&quad.edge(2)],
                    edge_map[&quad.edge(3)],
                )?;
            }
        }
        Ok(())
    }

    // --- quads --------------------------------------------------------------

    /// Convex-hull check for the quad spanned by four vertex ids.
    ///
    /// Projects the vertices onto the plane of the first three, then
    /// gift-wraps. On `true`, `vertex_ids` is rewritten into hull order
    /// (0-1-2-3-0). On `false` the order of `vertex_ids` is unspecified.
    pub fn compute_quad_convexity(&self, vertex_ids: &mut [usize; 4]) -> bool {
        let origin = self.vertices[vertex_ids[0]].coords();
        let e1 = sub(self.vertices[vertex_ids[1]].coords(), origin);
        let e2 = sub(self.vertices[vertex_ids[2]].coords(), origin);

        // in-plane coordinates of all four points; an affine basis is
        // enough since convexity is affine-invariant
        let mut coords = [[0.0f64; 2]; 4];
        for i in 0..4 {
            let d = sub(self.vertices[vertex_ids[i]].coords(), origin);
            coords[i] = [dot(e1, d), dot(e2, d)];
        }

        // gift wrapping, starting from the lowest-x point
        let mut id_lowest = 0;
        for i in 1..4 {
            if coords[i][0] < coords[id_lowest][0] {
                id_lowest = i;
            }
        }
        let input = *vertex_ids;
        let mut hull_len = 0usize;
        let mut current = id_lowest;
        loop {
            if hull_len == 4 {
                break;
            }
            vertex_ids[hull_len] = input[current];
            hull_len += 1;
            let mut next = (current + 1) % 4;
            for i in 0..4 {
                let y1 = coords[current][1] - coords[next][1];
                let y2 = coords[current][1] - coords[i][1];
                let x1 = coords[current][0] - coords[next][0];
                let x2 = coords[current][0] - coords[i][0];
                if y2 * x1 - y1 * x2 > 0.0 {
                    next = i;
                }
            }
            current = next;
            if current == id_lowest {
                break;
            }
        }
        hull_len == 4
    }

    /// Reorder four edge ids into a closed loop and derive the vertex loop.
    ///
    /// The first edge stays first; the edge sharing no vertex with it
    /// becomes third, the one sharing its first vertex becomes fourth, the
    /// one sharing its second vertex becomes second.
    pub fn quad_edge_order(&self, edge_ids: &mut [usize; 4]) -> Result<[usize; 4]> {
        let v0 = self.edges[edge_ids[0]].vertex(0);
        let v1 = self.edges[edge_ids[0]].vertex(1);
        let mut order: [Option<usize>; 4] = [Some(edge_ids[0]), None, None, None];
        let mut vertex_ids = [v0, v1, 0, 0];

        for &e in edge_ids[1..].iter() {
            let a = self.edges[e].vertex(0);
            let b = self.edges[e].vertex(1);
            let touches_v0 = a == v0 || b == v0;
            let touches_v1 = a == v1 || b == v1;
            if !touches_v0 && !touches_v1 {
                order[2] = Some(e);
            } else if touches_v0 && !touches_v1 {
                order[3] = Some(e);
                vertex_ids[3] = if a == v0 { b } else { a };
            } else if touches_v1 && !touches_v0 {
                order[1] = Some(e);
                vertex_ids[2] = if a == v1 { b } else { a };
            }
            // an edge touching both v0 and v1 duplicates edge 0; leave its
            // slot empty and fail below
        }

        for (i, slot) in order.iter().enumerate() {
            let Some(e) = slot else {
                return Err(self.invariant("quad edges do not form a closed loop".into()));
            };
            edge_ids[i] = *e;
        }
        Ok(vertex_ids)
    }

    fn invariant(&self, reason: String) -> CouplingError {
        CouplingError::MeshInvariant {
            mesh: self.name.clone(),
            reason,
        }
    }
}

// Equality is permutation equality on the element containers, with
// vertices compared by coordinates. Matches how two participants compare
// independently constructed copies of the same surface.
impl PartialEq for Mesh {
    fn eq(&self, other: &Self) -> bool {
        let vert_eq = |m: &Mesh, a: usize, n: &Mesh, b: usize| {
            m.vertices[a].coords() == n.vertices[b].coords()
        };
        let edge_eq = |a: &Edge, b: &Edge| {
            let (a0, a1) = (a.vertex(0), a.vertex(1));
            let (b0, b1) = (b.vertex(0), b.vertex(1));
            (vert_eq(self, a0, other, b0) && vert_eq(self, a1, other, b1))
                || (vert_eq(self, a0, other, b1) && vert_eq(self, a1, other, b0))
        };
        is_permutation(&self.vertices, &other.vertices, |a, b| a == b)
            && is_permutation(&self.edges, &other.edges, edge_eq)
            && is_permutation(&self.triangles, &other.triangles, |a, b| {
                face_eq(self, &a.vertices(), other, &b.vertices())
            })
            && is_permutation(&self.quads, &other.quads, |a, b| {
                face_eq(self, &a.vertices(), other, &b.vertices())
            })
    }
}

fn face_eq(m: &Mesh, a: &[usize], n: &Mesh, b: &[usize]) -> bool {
    let av: Vec<[f64; 3]> = a.iter().map(|&v| m.vertices()[v].coords()).collect();
    let bv: Vec<[f64; 3]> = b.iter().map(|&v| n.vertices()[v].coords()).collect();
    is_permutation(&av, &bv, |x, y| x == y)
}

fn is_permutation<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for x in a {
        for (i, y) in b.iter().enumerate() {
            if !used[i] && eq(x, y) {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

impl fmt::Display for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Mesh \"{}\", dimensionality = {}:",
            self.name, self.dimensions
        )?;
        write!(f, "GEOMETRYCOLLECTION(")?;
        let mut sep = "\n";
        for v in &self.vertices {
            let c = v.coords();
            write!(f, "{sep}POINT ({} {} {})", c[0], c[1], c[2])?;
            sep = ", ";
        }
        sep = ",\n";
        for e in &self.edges {
            let a = self.vertices[e.vertex(0)].coords();
            let b = self.vertices[e.vertex(1)].coords();
            write!(
                f,
                "{sep}LINESTRING ({} {} {}, {} {} {})",
                a[0], a[1], a[2], b[0], b[1], b[2]
            )?;
            sep = ", ";
        }
        write!(f, "\n)")
    }
}

// --- small vector helpers ---------------------------------------------------

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn normalized(a: [f64; 3]) -> [f64; 3] {
    let n = dot(a, a).sqrt();
    if n > 0.0 {
        scale(a, 1.0 / n)
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square(id: i32) -> Mesh {
        let mut mesh = Mesh::new("square", 3, false, MeshId(id)).unwrap();
        let v0 = mesh.create_vertex([0.0, 0.0, 0.0]);
        let v1 = mesh.create_vertex([1.0, 0.0, 0.0]);
        let v2 = mesh.create_vertex([1.0, 1.0, 0.0]);
        let v3 = mesh.create_vertex([0.0, 1.0, 0.0]);
        let e0 = mesh.create_edge(v0, v1).unwrap();
        let e1 = mesh.create_edge(v1, v2).unwrap();
        let e2 = mesh.create_edge(v2, v3).unwrap();
        let e3 = mesh.create_edge(v3, v0).unwrap();
        mesh.create_quad(e0, e1, e2, e3).unwrap();
        mesh
    }

    #[test]
    fn rejects_bad_dimensionality() {
        assert!(Mesh::new("m", 4, false, MeshId(0)).is_err());
        assert!(Mesh::new("", 2, false, MeshId(0)).is_err());
    }

    #[test]
    fn unique_edge_deduplicates_permutations() {
        let mut mesh = Mesh::new("m", 2, false, MeshId(0)).unwrap();
        let v0 = mesh.create_vertex([0.0, 0.0, 0.0]);
        let v1 = mesh.create_vertex([1.0, 0.0, 0.0]);
        let e = mesh.create_unique_edge(v0, v1).unwrap();
        assert_eq!(mesh.create_unique_edge(v1, v0).unwrap(), e);
        assert_eq!(mesh.edges().len(), 1);
    }

    #[test]
    fn triangle_requires_connected_edges() {
        let mut mesh = Mesh::new("m", 3, false, MeshId(0)).unwrap();
        let v: Vec<usize> = (0..4)
            .map(|i| mesh.create_vertex([i as f64, 0.0, 0.0]))
            .collect();
        let e0 = mesh.create_edge(v[0], v[1]).unwrap();
        let e1 = mesh.create_edge(v[2], v[3]).unwrap();
        let e2 = mesh.create_edge(v[1], v[2]).unwrap();
        assert!(mesh.create_triangle(e0, e1, e2).is_err());
    }

    #[test]
    fn allocate_resizes_and_zero_fills() {
        let mut mesh = Mesh::new("m", 3, false, MeshId(0)).unwrap();
        let data = mesh.create_data("Forces", 3).unwrap();
        mesh.create_vertex([0.0; 3]);
        mesh.create_vertex([1.0, 0.0, 0.0]);
        mesh.allocate_data_values();
        assert_eq!(mesh.data_by_id(data).unwrap().values().len(), 6);
        // shrink
        mesh.clear();
        mesh.create_vertex([0.0; 3]);
        mesh.allocate_data_values();
        assert_eq!(mesh.data_by_id(data).unwrap().values().len(), 3);
    }

    #[test]
    fn duplicate_data_name_rejected() {
        let mut mesh = Mesh::new("m", 2, false, MeshId(0)).unwrap();
        mesh.create_data("Forces", 1).unwrap();
        assert!(mesh.create_data("Forces", 1).is_err());
    }

    #[test]
    fn normals_of_a_flat_square_point_up() {
        let mut mesh = unit_square(0);
        mesh.compute_state();
        for v in mesh.vertices() {
            let n = v.normal();
            assert!((1.0 - n[2].abs()) < 1e-12, "normal {n:?}");
        }
    }

    #[test]
    fn flipped_normals_point_down() {
        let mut mesh = unit_square(0);
        mesh.set_flip_normals(true);
        mesh.compute_state();
        assert!(mesh.vertices()[0].normal()[2] < 0.0);
    }

    #[test]
    fn two_triangle_fan_normals_within_tolerance() {
        let mut mesh = Mesh::new("fan", 3, false, MeshId(0)).unwrap();
        let v0 = mesh.create_vertex([0.0, 0.0, 0.0]);
        let v1 = mesh.create_vertex([1.0, 0.0, 0.0]);
        let v2 = mesh.create_vertex([1.0, 1.0, 0.0]);
        let v3 = mesh.create_vertex([0.0, 1.0, 0.0]);
        let e01 = mesh.create_unique_edge(v0, v1).unwrap();
        let e12 = mesh.create_unique_edge(v1, v2).unwrap();
        let e02 = mesh.create_unique_edge(v0, v2).unwrap();
        let e23 = mesh.create_unique_edge(v2, v3).unwrap();
        let e03 = mesh.create_unique_edge(v0, v3).unwrap();
        mesh.create_triangle(e01, e12, e02).unwrap();
        mesh.create_triangle(e02, e23, e03).unwrap();
        mesh.compute_state();
        let up = [0.0, 0.0, 1.0];
        for v in mesh.vertices() {
            let d = dot(v.normal(), up);
            assert!((1.0 - d).abs() < 1e-12);
        }
    }

    #[test]
    fn quad_convexity_detects_concave_sets() {
        let mesh = unit_square(0);
        let mut convex = [0usize, 1, 2, 3];
        assert!(mesh.compute_quad_convexity(&mut convex));

        let mut concave_mesh = Mesh::new("concave", 3, false, MeshId(1)).unwrap();
        concave_mesh.create_vertex([0.0, 0.0, 0.0]);
        concave_mesh.create_vertex([1.0, 0.0, 0.0]);
        concave_mesh.create_vertex([0.2, 0.2, 0.0]); // inside the triangle of the others
        concave_mesh.create_vertex([0.0, 1.0, 0.0]);
        let mut ids = [0usize, 1, 2, 3];
        assert!(!concave_mesh.compute_quad_convexity(&mut ids));
    }

    #[test]
    fn quad_edge_order_builds_a_loop() {
        let mut mesh = Mesh::new("m", 3, false, MeshId(0)).unwrap();
        let v0 = mesh.create_vertex([0.0, 0.0, 0.0]);
        let v1 = mesh.create_vertex([1.0, 0.0, 0.0]);
        let v2 = mesh.create_vertex([1.0, 1.0, 0.0]);
        let v3 = mesh.create_vertex([0.0, 1.0, 0.0]);
        let e0 = mesh.create_edge(v0, v1).unwrap();
        let e2 = mesh.create_edge(v2, v3).unwrap();
        let e1 = mesh.create_edge(v1, v2).unwrap();
        let e3 = mesh.create_edge(v3, v0).unwrap();
        // shuffled input
        let mut ids = [e0, e2, e3, e1];
        let vs = mesh.quad_edge_order(&mut ids).unwrap();
        assert_eq!(ids, [e0, e1, e2, e3]);
        assert_eq!(vs, [v0, v1, v2, v3]);
    }

    #[test]
    fn add_mesh_merges_and_remaps() {
        let mut base = unit_square(0);
        let mut delta = Mesh::new("delta", 3, false, MeshId(1)).unwrap();
        let v0 = delta.create_vertex([5.0, 5.0, 0.0]);
        let v1 = delta.create_vertex([6.0, 5.0, 0.0]);
        delta.vertices_mut()[0].set_global_index(42);
        delta.vertices_mut()[0].set_owner(true);
        delta.create_edge(v0, v1).unwrap();
        base.add_mesh(&delta).unwrap();
        assert_eq!(base.vertices().len(), 6);
        assert_eq!(base.edges().len(), 5);
        assert_eq!(base.vertices()[4].global_index(), 42);
        assert!(base.vertices()[4].is_owner());
    }

    #[test]
    fn permutation_equality() {
        let a = unit_square(0);
        let b = unit_square(7); // ids differ, geometry matches
        assert_eq!(a, b);
        let mut c = unit_square(0);
        c.create_vertex([9.0, 9.0, 9.0]);
        assert_ne!(a, c);
    }

    #[test]
    fn owned_vertex_data_selects_owned_slices() {
        let mut mesh = Mesh::new("m", 2, false, MeshId(0)).unwrap();
        let data = mesh.create_data("Displacements", 2).unwrap();
        mesh.create_vertex([0.0; 3]);
        mesh.create_vertex([1.0, 0.0, 0.0]);
        mesh.create_vertex([2.0, 0.0, 0.0]);
        mesh.allocate_data_values();
        mesh.vertices_mut()[0].set_owner(true);
        mesh.vertices_mut()[2].set_owner(true);
        let values = mesh.data_by_id_mut(data).unwrap().values_mut();
        values.copy_from_slice(&[0.0, 1.0, 10.0, 11.0, 20.0, 21.0]);
        assert_eq!(
            mesh.owned_vertex_data(data).unwrap(),
            vec![0.0, 1.0, 20.0, 21.0]
        );
    }
}
