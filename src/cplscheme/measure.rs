//! Convergence measures for implicit coupling.
//!
//! A measure is a predicate over successive iterates of one field. All
//! configured measures must hold for a window to converge (conjunction).
//! The second participant evaluates and broadcasts the verdict; the first
//! never measures on its own, so the two cannot drift.

use crate::mesh::{DataId, MeshId};
use serde::{Deserialize, Serialize};

/// L2 norm of a vector.
pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// L2 norm of the element-wise difference.
pub fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Convergence criterion kind, as configured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    /// `‖new − old‖₂ < limit`
    Absolute { limit: f64 },
    /// `‖new − old‖₂ / ‖new‖₂ < limit`
    Relative { limit: f64 },
    /// residual norm relative to the window's first residual
    ResidualRelative { limit: f64 },
    /// at least `min` iterations, nothing else
    MinIterations { min: usize },
}

/// One configured measure bound to a field.
#[derive(Clone, Debug)]
pub struct ConvergenceMeasure {
    pub mesh: MeshId,
    pub data: DataId,
    pub criterion: Criterion,
    /// first residual of the current window (residual-relative only)
    first_residual: Option<f64>,
    /// distance of the last evaluation, for diagnostics
    last_distance: f64,
}

impl ConvergenceMeasure {
    pub fn new(mesh: MeshId, data: DataId, criterion: Criterion) -> Self {
        ConvergenceMeasure {
            mesh,
            data,
            criterion,
            first_residual: None,
            last_distance: 0.0,
        }
    }

    /// Evaluate against the previous iterate. `iteration` starts at 1.
    pub fn check(&mut self, old: &[f64], new: &[f64], iteration: usize) -> bool {
        self.check_distance(l2_distance(new, old), l2_norm(new), iteration)
    }

    /// Evaluate from precomputed norms. Distributed callers reduce the
    /// squared sums across ranks first and decide on the master.
    pub fn check_distance(&mut self, distance: f64, scale: f64, iteration: usize) -> bool {
        self.last_distance = distance;
        match self.criterion {
            Criterion::Absolute { limit } => distance < limit,
            Criterion::Relative { limit } => {
                if scale == 0.0 {
                    distance == 0.0
                } else {
                    distance / scale < limit
                }
            }
            Criterion::ResidualRelative { limit } => {
                let first = *self.first_residual.get_or_insert(distance);
                if first == 0.0 {
                    distance == 0.0
                } else {
                    distance / first < limit
                }
            }
            Criterion::MinIterations { min } => iteration >= min,
        }
    }

    /// Forget window-scoped state; called when a window commits.
    pub fn reset_window(&mut self) {
        self.first_residual = None;
    }

    pub fn last_distance(&self) -> f64 {
        self.last_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measure(criterion: Criterion) -> ConvergenceMeasure {
        ConvergenceMeasure::new(MeshId(0), DataId(0), criterion)
    }

    #[test]
    fn absolute_compares_the_difference_norm() {
        let mut m = measure(Criterion::Absolute { limit: 0.01 });
        assert!(!m.check(&[0.0, 0.0], &[1.0, 0.0], 1));
        assert!(m.check(&[1.0, 0.0], &[1.0, 0.005], 2));
    }

    #[test]
    fn relative_scales_by_the_new_iterate() {
        let mut m = measure(Criterion::Relative { limit: 1e-3 });
        // distance 0.5 against norm 1000 -> 5e-4 < 1e-3
        assert!(m.check(&[1000.0, 0.5], &[1000.0, 0.0], 1));
        // same distance against norm 1 fails
        assert!(!m.check(&[1.0, 0.5], &[1.0, 0.0], 1));
        // zero iterate converges only on zero distance
        assert!(m.check(&[0.0], &[0.0], 1));
        assert!(!m.check(&[0.1], &[0.0], 1));
    }

    #[test]
    fn residual_relative_normalizes_by_first_residual() {
        let mut m = measure(Criterion::ResidualRelative { limit: 0.1 });
        // first evaluation fixes the reference: ratio 1.0, not converged
        assert!(!m.check(&[0.0], &[10.0], 1));
        // residual shrank to 0.5 of 10 -> 0.05 < 0.1
        assert!(m.check(&[10.0], &[10.5], 2));
        m.reset_window();
        // new window, new reference
        assert!(!m.check(&[0.0], &[1.0], 1));
    }

    #[test]
    fn min_iterations_counts_only_iterations() {
        let mut m = measure(Criterion::MinIterations { min: 3 });
        assert!(!m.check(&[0.0], &[0.0], 1));
        assert!(!m.check(&[0.0], &[0.0], 2));
        assert!(m.check(&[9.0], &[-9.0], 3));
    }
}
