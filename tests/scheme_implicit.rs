//! Implicit coupling: convergence loop, rollback, and the forced commit at
//! the iteration bound.

mod common;

use common::{two_vertex_coords, PairBuilder, DISPLACEMENTS, FORCES, SURFACE};
use mesh_couple::config::MeasureConfig;
use mesh_couple::cplscheme::{actions, CouplingKind, Criterion};
use mesh_couple::intra::SingleRank;
use mesh_couple::participant::Participant;
use std::sync::Arc;

/// Fluid writes constant forces; Solid echoes half of what it receives.
/// The fixed point is reached after one corrected iterate, so window 1
/// takes two iterations and every later window converges immediately.
#[test]
fn serial_implicit_fixed_point() {
    common::init_logs();
    let mut builder = PairBuilder::new("impl-fp", CouplingKind::SerialImplicit, 20);
    builder.with_displacements = true;
    builder.max_windows = 2;
    builder.max_iterations = 50;
    builder.measures = vec![MeasureConfig {
        data: DISPLACEMENTS.into(),
        mesh: SURFACE.into(),
        criterion: Criterion::Absolute { limit: 0.01 },
    }];
    let config = builder.build();
    let (fluid_name, solid_name) = (builder.fluid(), builder.solid());
    let config_b = config.clone();

    let (fluid_advances, (solid_advances, final_displacements)) = common::run_pair(
        move || {
            let mut fluid = Participant::new(&fluid_name, config, Arc::new(SingleRank)).unwrap();
            let mesh = fluid.get_mesh_id(SURFACE).unwrap();
            let forces = fluid.get_data_id(FORCES, mesh).unwrap();
            let ids = fluid.set_mesh_vertices(mesh, &two_vertex_coords()).unwrap();
            let mut dt = fluid.initialize().unwrap();
            let mut advances = 0usize;
            while fluid.is_coupling_ongoing() {
                if fluid.is_action_required(actions::WRITE_ITERATION_CHECKPOINT) {
                    fluid
                        .mark_action_fulfilled(actions::WRITE_ITERATION_CHECKPOINT)
                        .unwrap();
                }
                fluid
                    .write_block_vector_data(forces, &ids, &[5.0, 5.0])
                    .unwrap();
                dt = fluid.advance(dt).unwrap();
                advances += 1;
                if fluid.is_action_required(actions::READ_ITERATION_CHECKPOINT) {
                    fluid
                        .mark_action_fulfilled(actions::READ_ITERATION_CHECKPOINT)
                        .unwrap();
                }
            }
            fluid.finalize();
            advances
        },
        move || {
            let mut solid = Participant::new(&solid_name, config_b, Arc::new(SingleRank)).unwrap();
            let mut dt = solid.initialize().unwrap();
            let mesh = solid.get_mesh_id(SURFACE).unwrap();
            let forces = solid.get_data_id(FORCES, mesh).unwrap();
            let displacements = solid.get_data_id(DISPLACEMENTS, mesh).unwrap();
            let ids = [0usize, 1];
            let mut advances = 0usize;
            let mut last = vec![0.0; 2];
            while solid.is_coupling_ongoing() {
                if solid.is_action_required(actions::WRITE_ITERATION_CHECKPOINT) {
                    solid
                        .mark_action_fulfilled(actions::WRITE_ITERATION_CHECKPOINT)
                        .unwrap();
                }
                let mut received = vec![0.0; 2];
                solid
                    .read_block_vector_data(forces, &ids, &mut received)
                    .unwrap();
                last = received.iter().map(|f| f * 0.5).collect();
                solid.write_block_vector_data(displacements, &ids, &last).unwrap();
                dt = solid.advance(dt).unwrap();
                advances += 1;
                if solid.is_action_required(actions::READ_ITERATION_CHECKPOINT) {
                    solid
                        .mark_action_fulfilled(actions::READ_ITERATION_CHECKPOINT)
                        .unwrap();
                }
            }
            solid.finalize();
            (advances, last)
        },
    );

    // window 1: two iterations; window 2: one
    assert_eq!(fluid_advances, 3);
    assert_eq!(solid_advances, 3);
    assert_eq!(final_displacements, vec![2.5, 2.5]);
}

/// A measure that can never pass: the scheme must commit after exactly
/// `max_iterations` and advance.
#[test]
fn non_convergence_commits_at_the_iteration_bound() {
    let mut builder = PairBuilder::new("impl-bound", CouplingKind::SerialImplicit, 21);
    builder.with_displacements = true;
    builder.max_windows = 1;
    builder.max_iterations = 3;
    builder.measures = vec![MeasureConfig {
        data: DISPLACEMENTS.into(),
        mesh: SURFACE.into(),
        criterion: Criterion::Absolute { limit: 0.0 },
    }];
    let config = builder.build();
    let (fluid_name, solid_name) = (builder.fluid(), builder.solid());
    let config_b = config.clone();

    let (fluid_advances, solid_advances) = common::run_pair(
        move || {
            let mut fluid = Participant::new(&fluid_name, config, Arc::new(SingleRank)).unwrap();
            let mesh = fluid.get_mesh_id(SURFACE).unwrap();
            let forces = fluid.get_data_id(FORCES, mesh).unwrap();
            let ids = fluid.set_mesh_vertices(mesh, &two_vertex_coords()).unwrap();
            let mut dt = fluid.initialize().unwrap();
            let mut advances = 0usize;
            while fluid.is_coupling_ongoing() {
                fluid.write_block_vector_data(forces, &ids, &[1.0, 1.0]).unwrap();
                dt = fluid.advance(dt).unwrap();
                advances += 1;
                if fluid.is_action_required(actions::READ_ITERATION_CHECKPOINT) {
                    fluid
                        .mark_action_fulfilled(actions::READ_ITERATION_CHECKPOINT)
                        .unwrap();
                }
            }
            assert!(fluid.is_time_window_complete());
            fluid.finalize();
            advances
        },
        move || {
            let mut solid = Participant::new(&solid_name, config_b, Arc::new(SingleRank)).unwrap();
            let mut dt = solid.initialize().unwrap();
            let mesh = solid.get_mesh_id(SURFACE).unwrap();
            let displacements = solid.get_data_id(DISPLACEMENTS, mesh).unwrap();
            let ids = [0usize, 1];
            let mut advances = 0usize;
            let mut iterate = 0.0;
            while solid.is_coupling_ongoing() {
                // a different value every iteration: never converges
                iterate += 1.0;
                solid
                    .write_block_vector_data(displacements, &ids, &[iterate, -iterate])
                    .unwrap();
                dt = solid.advance(dt).unwrap();
                advances += 1;
                if solid.is_action_required(actions::READ_ITERATION_CHECKPOINT) {
                    solid
                        .mark_action_fulfilled(actions::READ_ITERATION_CHECKPOINT)
                        .unwrap();
                }
            }
            assert!(solid.is_time_window_complete());
            solid.finalize();
            advances
        },
    );

    assert_eq!(fluid_advances, 3);
    assert_eq!(solid_advances, 3);
}

/// An echo solver converges the moment its iterate stops moving; parallel
/// implicit must agree on the verdict through the control channel.
#[test]
fn parallel_implicit_echo_converges() {
    let mut builder = PairBuilder::new("impl-par", CouplingKind::ParallelImplicit, 22);
    builder.with_displacements = true;
    builder.max_windows = 2;
    builder.max_iterations = 10;
    builder.measures = vec![MeasureConfig {
        data: DISPLACEMENTS.into(),
        mesh: SURFACE.into(),
        criterion: Criterion::Absolute { limit: 1e-12 },
    }];
    let config = builder.build();
    let (fluid_name, solid_name) = (builder.fluid(), builder.solid());
    let config_b = config.clone();

    let (windows_seen, _) = common::run_pair(
        move || {
            let mut fluid = Participant::new(&fluid_name, config, Arc::new(SingleRank)).unwrap();
            let mesh = fluid.get_mesh_id(SURFACE).unwrap();
            let forces = fluid.get_data_id(FORCES, mesh).unwrap();
            let ids = fluid.set_mesh_vertices(mesh, &two_vertex_coords()).unwrap();
            let mut dt = fluid.initialize().unwrap();
            let mut windows = 0usize;
            while fluid.is_coupling_ongoing() {
                fluid.write_block_vector_data(forces, &ids, &[2.0, 2.0]).unwrap();
                dt = fluid.advance(dt).unwrap();
                if fluid.is_time_window_complete() {
                    windows += 1;
                }
                if fluid.is_action_required(actions::READ_ITERATION_CHECKPOINT) {
                    fluid
                        .mark_action_fulfilled(actions::READ_ITERATION_CHECKPOINT)
                        .unwrap();
                }
            }
            fluid.finalize();
            windows
        },
        move || {
            let mut solid = Participant::new(&solid_name, config_b, Arc::new(SingleRank)).unwrap();
            let mut dt = solid.initialize().unwrap();
            let mesh = solid.get_mesh_id(SURFACE).unwrap();
            let displacements = solid.get_data_id(DISPLACEMENTS, mesh).unwrap();
            let ids = [0usize, 1];
            while solid.is_coupling_ongoing() {
                // constant iterate: distance is zero from iteration 2 on
                solid
                    .write_block_vector_data(displacements, &ids, &[7.0, 7.0])
                    .unwrap();
                dt = solid.advance(dt).unwrap();
                if solid.is_action_required(actions::READ_ITERATION_CHECKPOINT) {
                    solid
                        .mark_action_fulfilled(actions::READ_ITERATION_CHECKPOINT)
                        .unwrap();
                }
            }
            solid.finalize();
        },
    );

    assert_eq!(windows_seen, 2);
}
