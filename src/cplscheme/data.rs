//! Per-exchange coupling buffers.
//!
//! A [`CouplingData`] entry never aliases the live value buffer: it holds
//! the (mesh, data) handle and resolves it against the [`MeshStore`] on
//! each use. The registry refuses to hand out entries it does not have;
//! there is no default-constructed record.

use crate::error::{CouplingError, Result};
use crate::m2n::Constraint;
use crate::mesh::{DataId, MeshId, MeshStore};
use std::collections::BTreeMap;

/// Key of a registered exchange buffer.
pub type DataKey = (MeshId, DataId);

/// Buffers of one exchanged field.
#[derive(Clone, Debug)]
pub struct CouplingData {
    pub mesh: MeshId,
    pub data: DataId,
    /// components per vertex (1, or the mesh dimensionality)
    pub dimension: usize,
    /// whether a participant fills this field before the first exchange
    pub initialize: bool,
    /// staging buffer for solver sub-steps within one window
    new_values: Vec<f64>,
    /// column 0: previous iterate; further columns: earlier iterates and
    /// window-final values, most recent first
    old_values: Vec<Vec<f64>>,
    checkpoint: Vec<f64>,
}

impl CouplingData {
    /// Previous iterate of this field.
    pub fn previous_iterate(&self) -> &[f64] {
        &self.old_values[0]
    }

    pub fn history(&self) -> &[Vec<f64>] {
        &self.old_values
    }

    pub fn staged(&self) -> &[f64] {
        &self.new_values
    }
}

/// Registry of all exchange buffers of a scheme.
pub struct DataRegistry {
    entries: BTreeMap<DataKey, CouplingData>,
    history_depth: usize,
}

impl Default for DataRegistry {
    fn default() -> Self {
        DataRegistry {
            entries: BTreeMap::new(),
            history_depth: 3,
        }
    }
}

impl DataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field for exchange. The mesh and data must exist; the
    /// buffers are sized on [`DataRegistry::initialize_buffers`] once the
    /// mesh is partitioned and allocated.
    pub fn register(
        &mut self,
        store: &MeshStore,
        mesh: MeshId,
        data: DataId,
        initialize: bool,
    ) -> Result<()> {
        let dimension = store
            .mesh(mesh)?
            .data_by_id(data)
            .ok_or(CouplingError::UnknownData { mesh, data })?
            .dimension();
        self.entries.insert(
            (mesh, data),
            CouplingData {
                mesh,
                data,
                dimension,
                initialize,
                new_values: Vec::new(),
                old_values: vec![Vec::new()],
                checkpoint: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn get(&self, mesh: MeshId, data: DataId) -> Option<&CouplingData> {
        self.entries.get(&(mesh, data))
    }

    pub fn keys(&self) -> impl Iterator<Item = DataKey> + '_ {
        self.entries.keys().copied()
    }

    /// Size every buffer to the live value buffer's length and verify the
    /// length invariant `|values| == |vertices| × dimension`.
    pub fn initialize_buffers(&mut self, store: &MeshStore) -> Result<()> {
        for entry in self.entries.values_mut() {
            let mesh = store.mesh(entry.mesh)?;
            let data = mesh
                .data_by_id(entry.data)
                .ok_or(CouplingError::UnknownData {
                    mesh: entry.mesh,
                    data: entry.data,
                })?;
            let expected = mesh.vertices().len() * entry.dimension;
            if data.values().len() != expected {
                return Err(CouplingError::BufferSizeMismatch {
                    data: entry.data,
                    expected,
                    got: data.values().len(),
                });
            }
            entry.new_values = vec![0.0; expected];
            for col in &mut entry.old_values {
                col.resize(expected, 0.0);
            }
            entry.checkpoint = vec![0.0; expected];
        }
        Ok(())
    }

    fn entry_mut(&mut self, key: DataKey) -> Result<&mut CouplingData> {
        self.entries.get_mut(&key).ok_or(CouplingError::UnknownData {
            mesh: key.0,
            data: key.1,
        })
    }

    fn live<'a>(store: &'a MeshStore, key: DataKey) -> Result<&'a [f64]> {
        Ok(store
            .mesh(key.0)?
            .data_by_id(key.1)
            .ok_or(CouplingError::UnknownData {
                mesh: key.0,
                data: key.1,
            })?
            .values())
    }

    fn live_mut<'a>(store: &'a mut MeshStore, key: DataKey) -> Result<&'a mut Vec<f64>> {
        Ok(store
            .mesh_mut(key.0)?
            .data_by_id_mut(key.1)
            .ok_or(CouplingError::UnknownData {
                mesh: key.0,
                data: key.1,
            })?
            .values_mut())
    }

    /// Fold the solver's sub-step contribution into the staging buffer:
    /// conservative quantities sum, consistent quantities keep the last
    /// written values.
    pub fn stage_substep(
        &mut self,
        store: &MeshStore,
        key: DataKey,
        constraint: Constraint,
    ) -> Result<()> {
        let live = Self::live(store, key)?.to_vec();
        let entry = self.entry_mut(key)?;
        match constraint {
            Constraint::Conservative => {
                for (staged, v) in entry.new_values.iter_mut().zip(&live) {
                    *staged += v;
                }
            }
            Constraint::Consistent => entry.new_values.copy_from_slice(&live),
        }
        Ok(())
    }

    /// Rotate the staging buffer into the live values and append the
    /// previous values as the newest history column, truncating to the
    /// configured depth. Swapping twice restores the live values
    /// bit-exactly.
    pub fn swap(&mut self, store: &mut MeshStore, key: DataKey) -> Result<()> {
        let depth = self.history_depth;
        let entry = self.entry_mut(key)?;
        let new_values = &mut entry.new_values;
        let live = Self::live_mut(store, key)?;
        let previous = live.clone();
        std::mem::swap(live, new_values);
        entry.old_values.insert(0, previous);
        entry.old_values.truncate(depth);
        Ok(())
    }

    /// Copy the staged window values into the live buffer, making them the
    /// payload of the next exchange.
    pub fn publish_staged(&mut self, store: &mut MeshStore, key: DataKey) -> Result<()> {
        let staged = self.entry_mut(key)?.new_values.clone();
        Self::live_mut(store, key)?.copy_from_slice(&staged);
        Ok(())
    }

    /// Reset the staging buffer for the next window's sub-cycling.
    pub fn reset_staging(&mut self, key: DataKey) -> Result<()> {
        let entry = self.entry_mut(key)?;
        entry.new_values.fill(0.0);
        Ok(())
    }

    /// Record the current live values as the previous iterate.
    pub fn update_iterate(&mut self, store: &MeshStore, key: DataKey) -> Result<()> {
        let live = Self::live(store, key)?.to_vec();
        self.entry_mut(key)?.old_values[0] = live;
        Ok(())
    }

    /// Snapshot the live values for rollback.
    pub fn store_checkpoint(&mut self, store: &MeshStore, key: DataKey) -> Result<()> {
        let live = Self::live(store, key)?.to_vec();
        self.entry_mut(key)?.checkpoint = live;
        Ok(())
    }

    /// Roll the live values back to the last snapshot.
    pub fn restore_checkpoint(&mut self, store: &mut MeshStore, key: DataKey) -> Result<()> {
        let snapshot = self.entry_mut(key)?.checkpoint.clone();
        Self::live_mut(store, key)?.copy_from_slice(&snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;

    fn setup() -> (MeshStore, DataKey) {
        let mut store = MeshStore::new();
        let mut mesh = Mesh::new("m", 2, false, MeshId(0)).unwrap();
        let data = mesh.create_data("Forces", 1).unwrap();
        mesh.create_vertex([0.0, 0.0, 0.0]);
        mesh.create_vertex([1.0, 0.0, 0.0]);
        mesh.allocate_data_values();
        let id = mesh.id();
        store.insert(mesh);
        (store, (id, data))
    }

    fn set_live(store: &mut MeshStore, key: DataKey, vals: &[f64]) {
        store
            .mesh_mut(key.0)
            .unwrap()
            .data_by_id_mut(key.1)
            .unwrap()
            .values_mut()
            .copy_from_slice(vals);
    }

    fn live(store: &MeshStore, key: DataKey) -> Vec<f64> {
        store
            .mesh(key.0)
            .unwrap()
            .data_by_id(key.1)
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn register_and_lookup() {
        let (store, key) = setup();
        let mut reg = DataRegistry::new();
        reg.register(&store, key.0, key.1, true).unwrap();
        assert!(reg.get(key.0, key.1).is_some());
        assert!(reg.get(key.0, DataId(9999)).is_none());
        assert!(reg
            .register(&store, key.0, DataId(9999), false)
            .is_err());
    }

    #[test]
    fn buffer_length_invariant_is_enforced() {
        let (mut store, key) = setup();
        let mut reg = DataRegistry::new();
        reg.register(&store, key.0, key.1, false).unwrap();
        reg.initialize_buffers(&store).unwrap();

        store
            .mesh_mut(key.0)
            .unwrap()
            .data_by_id_mut(key.1)
            .unwrap()
            .values_mut()
            .push(0.0);
        assert!(matches!(
            reg.initialize_buffers(&store),
            Err(CouplingError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn double_swap_restores_values_bit_exactly() {
        let (mut store, key) = setup();
        let mut reg = DataRegistry::new();
        reg.register(&store, key.0, key.1, false).unwrap();
        reg.initialize_buffers(&store).unwrap();

        set_live(&mut store, key, &[0.1 + 0.2, -7.25]);
        let original = live(&store, key);
        reg.stage_substep(&store, key, Constraint::Consistent)
            .unwrap();
        set_live(&mut store, key, &[99.0, 99.0]);

        reg.swap(&mut store, key).unwrap();
        reg.swap(&mut store, key).unwrap();
        assert_eq!(live(&store, key), vec![99.0, 99.0]);
        // and the twice-swapped values lead the history
        assert_eq!(reg.get(key.0, key.1).unwrap().history().len(), 3);
        assert_eq!(reg.get(key.0, key.1).unwrap().history()[0], original);
        assert_eq!(reg.get(key.0, key.1).unwrap().history()[1], vec![99.0, 99.0]);
    }

    #[test]
    fn conservative_staging_sums_substeps() {
        let (mut store, key) = setup();
        let mut reg = DataRegistry::new();
        reg.register(&store, key.0, key.1, false).unwrap();
        reg.initialize_buffers(&store).unwrap();

        set_live(&mut store, key, &[1.0, 2.0]);
        reg.stage_substep(&store, key, Constraint::Conservative)
            .unwrap();
        set_live(&mut store, key, &[10.0, 20.0]);
        reg.stage_substep(&store, key, Constraint::Conservative)
            .unwrap();
        assert_eq!(reg.get(key.0, key.1).unwrap().staged(), &[11.0, 22.0]);

        reg.reset_staging(key).unwrap();
        set_live(&mut store, key, &[1.0, 1.0]);
        reg.stage_substep(&store, key, Constraint::Consistent)
            .unwrap();
        set_live(&mut store, key, &[2.0, 2.0]);
        reg.stage_substep(&store, key, Constraint::Consistent)
            .unwrap();
        assert_eq!(reg.get(key.0, key.1).unwrap().staged(), &[2.0, 2.0]);
    }

    #[test]
    fn checkpoint_round_trip() {
        let (mut store, key) = setup();
        let mut reg = DataRegistry::new();
        reg.register(&store, key.0, key.1, false).unwrap();
        reg.initialize_buffers(&store).unwrap();

        set_live(&mut store, key, &[3.0, 4.0]);
        reg.store_checkpoint(&store, key).unwrap();
        set_live(&mut store, key, &[8.0, 9.0]);
        reg.restore_checkpoint(&mut store, key).unwrap();
        assert_eq!(live(&store, key), vec![3.0, 4.0]);
    }
}
