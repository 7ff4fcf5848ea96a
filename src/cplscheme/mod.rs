//! Coupling schemes: per-exchange data buffers, convergence measures, and
//! the time-window state machine that drives them.

pub mod data;
pub mod measure;
pub mod scheme;

pub use data::{CouplingData, DataKey, DataRegistry};
pub use measure::{l2_distance, l2_norm, ConvergenceMeasure, Criterion};
pub use scheme::{actions, CouplingKind, CouplingScheme, ExchangePlan, Role, SchemeSetup, State};
