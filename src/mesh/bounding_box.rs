//! Axis-aligned bounding boxes for geometric partitioning.

use bytemuck::{Pod, Zeroable};

/// Axis-aligned min/max box in 2 or 3 dimensions.
///
/// A fresh box is empty (inverted bounds) until expanded by a vertex.
/// The flat `[f64; 6]` form is the wire/gather representation.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BoundingBox {
    min: [f64; 3],
    max: [f64; 3],
}

impl BoundingBox {
    /// Empty box: expands from nothing.
    pub fn new() -> Self {
        BoundingBox {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// True until the first expansion.
    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0]
    }

    /// Grow the box to contain `coords`.
    pub fn expand_by(&mut self, coords: [f64; 3]) {
        for d in 0..3 {
            self.min[d] = self.min[d].min(coords[d]);
            self.max[d] = self.max[d].max(coords[d]);
        }
    }

    /// Inflate by a safety factor: every axis grows by
    /// `factor × longest side length` on both ends.
    pub fn inflate(&mut self, factor: f64, dims: usize) {
        if self.is_empty() || factor == 0.0 {
            return;
        }
        let mut longest = 0.0f64;
        for d in 0..dims {
            longest = longest.max(self.max[d] - self.min[d]);
        }
        let pad = factor * longest;
        for d in 0..dims {
            self.min[d] -= pad;
            self.max[d] += pad;
        }
    }

    /// Interval overlap in every dimension. Empty boxes overlap nothing.
    pub fn overlaps(&self, other: &BoundingBox, dims: usize) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (0..dims).all(|d| self.min[d] <= other.max[d] && other.min[d] <= self.max[d])
    }

    /// Whether `coords` lies inside (inclusive bounds).
    pub fn contains(&self, coords: [f64; 3], dims: usize) -> bool {
        !self.is_empty() && (0..dims).all(|d| self.min[d] <= coords[d] && coords[d] <= self.max[d])
    }

    pub fn min(&self) -> [f64; 3] {
        self.min
    }

    pub fn max(&self) -> [f64; 3] {
        self.max
    }

    /// Flat form for gathers and the master-master handshake.
    pub fn to_flat(&self) -> [f64; 6] {
        [
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2],
        ]
    }

    pub fn from_flat(flat: &[f64]) -> Self {
        debug_assert_eq!(flat.len(), 6);
        BoundingBox {
            min: [flat[0], flat[1], flat[2]],
            max: [flat[3], flat[4], flat[5]],
        }
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}
