//! Data: a named scalar or vector field on a mesh.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};

/// Globally unique id of a data field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataId(pub i32);

static DATA_COUNT: AtomicI32 = AtomicI32::new(0);

/// A named field on a mesh: `dimension` components per vertex, flat
/// vertex-major value buffer of length `|vertices| × dimension`.
#[derive(Clone, Debug)]
pub struct Data {
    id: DataId,
    name: String,
    dimension: usize,
    values: Vec<f64>,
}

impl Data {
    /// Ids are unique across all data of the process, whichever mesh the
    /// field lives on.
    pub(crate) fn new(name: String, dimension: usize) -> Self {
        let id = DataId(DATA_COUNT.fetch_add(1, Ordering::Relaxed));
        Data {
            id,
            name,
            dimension,
            values: Vec::new(),
        }
    }

    pub fn id(&self) -> DataId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Vec<f64> {
        &mut self.values
    }
}
