//! Mesh ownership and the spatial-index cache.
//!
//! The store owns every mesh of a participant; all other subsystems refer
//! to meshes by id and resolve through it. Mutable access invalidates the
//! mesh's cached spatial index, which is rebuilt lazily on next query —
//! there is no observer wiring between mesh and cache.

use crate::error::{CouplingError, Result};
use crate::mesh::{BoundingBox, Mesh, MeshId};
use std::collections::{BTreeMap, HashMap};

/// Cache of derived per-mesh spatial structures, keyed by mesh id.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    bounding_boxes: HashMap<MeshId, BoundingBox>,
}

impl IndexRegistry {
    /// Drop every cached structure for `mesh_id`. Mutating operations call
    /// this; nothing else may repopulate the cache but a query.
    pub fn invalidate(&mut self, mesh_id: MeshId) {
        self.bounding_boxes.remove(&mesh_id);
    }

    fn bounding_box(&mut self, mesh: &Mesh) -> BoundingBox {
        *self.bounding_boxes.entry(mesh.id()).or_insert_with(|| {
            let mut bb = BoundingBox::new();
            for vertex in mesh.vertices() {
                bb.expand_by(vertex.coords());
            }
            bb
        })
    }
}

/// Id-keyed owner of a participant's meshes.
#[derive(Default)]
pub struct MeshStore {
    meshes: BTreeMap<MeshId, Mesh>,
    index: IndexRegistry,
}

impl MeshStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mesh: Mesh) -> MeshId {
        let id = mesh.id();
        self.index.invalidate(id);
        self.meshes.insert(id, mesh);
        id
    }

    pub fn contains(&self, id: MeshId) -> bool {
        self.meshes.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = MeshId> + '_ {
        self.meshes.keys().copied()
    }

    pub fn mesh(&self, id: MeshId) -> Result<&Mesh> {
        self.meshes.get(&id).ok_or(CouplingError::MissingMesh(id))
    }

    /// Mutable access; conservatively invalidates the spatial index.
    pub fn mesh_mut(&mut self, id: MeshId) -> Result<&mut Mesh> {
        self.index.invalidate(id);
        self.meshes
            .get_mut(&id)
            .ok_or(CouplingError::MissingMesh(id))
    }

    pub fn mesh_by_name(&self, name: &str) -> Option<&Mesh> {
        self.meshes.values().find(|m| m.name() == name)
    }

    /// Cached bounding box of the mesh's local vertices.
    pub fn cached_bounding_box(&mut self, id: MeshId) -> Result<BoundingBox> {
        let mesh = self.meshes.get(&id).ok_or(CouplingError::MissingMesh(id))?;
        Ok(self.index.bounding_box(mesh))
    }
}
