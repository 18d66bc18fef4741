//! As-rigid-as-possible mesh deformation solves.

use approx::assert_relative_eq;
use patch_solver::test_utils::{free_constraints, grid_mesh, pin_vertices};
use patch_solver::{
    MeshInput, MeshSolver, PatchSolverConfig, SolveStatus, SolverError, SolverParameters,
};

const OFFSET: [f64; 3] = [0.3, -0.2, 0.5];

fn params() -> SolverParameters {
    SolverParameters {
        non_linear_iterations: 8,
        linear_iterations: 8,
        patch_iterations: 40,
        weight_fitting: 1.0,
        weight_regularizer: 1.0,
        weight_prior: 0.0,
        ..Default::default()
    }
}

/// 4x4 grid with the four corners pinned to a translated copy.
fn translated_corners() -> (Vec<f64>, patch_solver::MeshTopology, Vec<f64>) {
    let (rest, topology) = grid_mesh::<f64>(4, 4, 1.0);
    let mut constraints = free_constraints(16);
    pin_vertices(&mut constraints, &rest, &[0, 3, 12, 15], OFFSET);
    (rest, topology, constraints)
}

fn assert_translated(rest: &[f64], positions: &[f64], angles: &[f64]) {
    for v in 0..rest.len() / 3 {
        for c in 0..3 {
            assert_relative_eq!(positions[3 * v + c], rest[3 * v + c] + OFFSET[c], epsilon = 1e-5);
        }
    }
    assert!(angles.iter().all(|a| a.abs() < 1e-5));
}

#[test]
fn test_translation_stays_rigid() {
    let (rest, topology, constraints) = translated_corners();
    let input = MeshInput::new(&rest, &topology, &constraints);
    let mut positions = rest.clone();
    let mut angles = vec![0.0; rest.len()];

    let solver = MeshSolver::<f64>::new(PatchSolverConfig::default()).unwrap();
    assert_eq!(solver.chunk_size(), 256);
    let report = solver.solve(&input, &params(), &mut positions, &mut angles).unwrap();

    assert_eq!(report.status, SolveStatus::Completed);
    assert_eq!(report.num_elements, 16);
    assert_eq!(report.num_patches, 1);
    assert!(report.final_cost.unwrap() < 1e-8);
    assert_translated(&rest, &positions, &angles);
}

#[test]
fn test_interpolated_reaches_targets() {
    let (rest, topology, constraints) = translated_corners();
    let input = MeshInput::new(&rest, &topology, &constraints);
    let mut positions = rest.clone();
    let mut angles = vec![0.0; rest.len()];

    let solver = MeshSolver::<f64>::new(PatchSolverConfig::default()).unwrap();
    let reports = solver
        .solve_interpolated(&input, &params(), 3, &mut positions, &mut angles)
        .unwrap();

    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.status == SolveStatus::Completed));
    // Every step moves the corners by the same third of the offset.
    assert_relative_eq!(
        reports[0].initial_cost.unwrap(),
        reports[2].initial_cost.unwrap(),
        max_relative = 1e-4
    );
    assert_translated(&rest, &positions, &angles);
}

#[test]
fn test_rest_pose_is_a_fixed_point() {
    let (rest, topology) = grid_mesh::<f32>(3, 3, 0.5);
    let mut constraints = free_constraints(9);
    pin_vertices(&mut constraints, &rest, &[0, 8], [0.0; 3]);
    let input = MeshInput::new(&rest, &topology, &constraints);

    let mut positions = rest.clone();
    let mut angles = vec![0.0f32; rest.len()];
    let solver = MeshSolver::<f32>::new(PatchSolverConfig {
        patch_size: 1,
        ..Default::default()
    })
    .unwrap();
    let report = solver.solve(&input, &params(), &mut positions, &mut angles).unwrap();

    assert_eq!(report.num_patches, 9);
    assert_eq!(report.initial_cost, Some(0.0));
    assert_eq!(positions, rest);
    assert!(angles.iter().all(|&a| a == 0.0));
}

#[test]
fn test_mismatched_buffers_are_rejected() {
    let (rest, topology, constraints) = translated_corners();
    let input = MeshInput::new(&rest, &topology, &constraints);
    let mut positions = rest.clone();
    let mut angles = vec![0.0; rest.len() - 1];

    let solver = MeshSolver::<f64>::new(PatchSolverConfig::default()).unwrap();
    let err = solver
        .solve(&input, &params(), &mut positions, &mut angles)
        .unwrap_err();
    assert_eq!(
        err,
        SolverError::DimensionMismatch {
            buffer: "angles",
            expected: 48,
            actual: 47
        }
    );
    assert_eq!(positions, rest);

    let short = &constraints[..45];
    let bad_input = MeshInput::new(&rest, &topology, short);
    let err = solver
        .solve(&bad_input, &params(), &mut positions, &mut vec![0.0; 48])
        .unwrap_err();
    assert!(matches!(err, SolverError::DimensionMismatch { buffer: "constraints", .. }));
}
