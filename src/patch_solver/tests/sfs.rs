//! End-to-end shape-from-shading solves.

use approx::assert_relative_eq;
use patch_solver::test_utils::{
    add_gaussian_noise, flat_depth, hemisphere_depth, mask_with_holes, max_abs_diff,
    rotation_about_optical_axis, SfsScene,
};
use patch_solver::{
    test_println, BackendKind, CalibrationParams, ImageDims, LightingCoefficients, PatchSolver,
    PatchSolverConfig, Real, SnapshotKind, SnapshotRecorder, SolveHooks, SolveStatus,
    SolverParameters,
};

fn fitting_only(non_linear_iterations: usize) -> SolverParameters {
    SolverParameters {
        non_linear_iterations,
        linear_iterations: 2,
        patch_iterations: 4,
        weight_fitting: 1.0,
        weight_shading_start: 0.0,
        weight_shading_increment: 0.0,
        weight_regularizer: 0.0,
        weight_prior: 0.0,
        weight_boundary: 0.0,
    }
}

fn no_shading() -> SolverParameters {
    SolverParameters {
        weight_shading_start: 0.0,
        weight_shading_increment: 0.0,
        ..Default::default()
    }
}

fn solver<T: Real>(dims: ImageDims, patch_size: usize, use_remapping: bool) -> PatchSolver<T> {
    PatchSolver::builder()
        .patch_size(patch_size)
        .remapping(use_remapping)
        .build(dims, CalibrationParams::new(20.0, 20.0, 1.5, 1.5))
        .unwrap()
}

fn flat_fit_converges_in_one_iteration<T: Real + std::fmt::Debug>(patch_size: usize, epsilon: f64) {
    let dims = ImageDims::new(4, 4);
    let scene = SfsScene::<T>::from_depth(dims, flat_depth(dims, 2.0));
    let mut depth = flat_depth::<T>(dims, 1.0);

    let mut solver = solver::<T>(dims, patch_size, true);
    let report = solver.solve_sfs(&scene.input(), &fitting_only(1), &mut depth).unwrap();

    assert_eq!(report.status, SolveStatus::Completed);
    assert_eq!(report.num_iterations(), 1);
    assert!(max_abs_diff(&depth, &scene.target_depth) <= epsilon);
    assert!(report.final_cost.unwrap() <= epsilon);
}

#[test]
fn test_flat_fit_exact_single_patch() {
    flat_fit_converges_in_one_iteration::<f64>(16, 1e-12);
    flat_fit_converges_in_one_iteration::<f32>(16, 1e-6);
}

#[test]
fn test_flat_fit_exact_any_patch_size() {
    for patch_size in [1, 2, 3, 4] {
        flat_fit_converges_in_one_iteration::<f64>(patch_size, 1e-12);
        flat_fit_converges_in_one_iteration::<f32>(patch_size, 1e-6);
    }
}

#[test]
fn test_single_hole_is_never_read() {
    let dims = ImageDims::new(4, 4);
    let hole = 4 + 1;
    let mut scene = SfsScene::<f64>::from_depth(dims, flat_depth(dims, 1.5))
        .with_mask(mask_with_holes(dims, &[(1, 1)]));
    scene.target_depth[hole] = f64::NAN;
    scene.previous_depth[hole] = f64::NAN;

    for use_remapping in [true, false] {
        let mut depth = flat_depth::<f64>(dims, 1.0);
        depth[hole] = f64::NAN;

        let mut solver = solver::<f64>(dims, 4, use_remapping);
        let report = solver.solve_sfs(&scene.input(), &no_shading(), &mut depth).unwrap();

        if use_remapping {
            assert_eq!(solver.remapper().num_active(), 15);
            assert_eq!(solver.remapper().remap_table().len(), 15);
            assert!(!solver.remapper().remap_table().contains(&(hole as u32)));
        }
        assert_eq!(report.num_elements, 15);
        assert!(depth[hole].is_nan());
        assert!(depth
            .iter()
            .enumerate()
            .all(|(i, d)| i == hole || d.is_finite()));
        assert!(report.final_cost.unwrap().is_finite());
    }
}

#[test]
fn test_delta_transform_does_not_affect_fitting() {
    let dims = ImageDims::new(4, 4);
    let scene = SfsScene::<f64>::from_depth(dims, flat_depth(dims, 2.0));
    let params = SolverParameters {
        non_linear_iterations: 1,
        ..no_shading()
    };

    let mut plain = flat_depth::<f64>(dims, 1.0);
    solver::<f64>(dims, 4, true)
        .solve_sfs(&scene.input(), &params, &mut plain)
        .unwrap();

    let rotated_input = scene
        .input()
        .with_delta_transform(rotation_about_optical_axis(std::f64::consts::PI));
    let mut rotated = flat_depth::<f64>(dims, 1.0);
    solver::<f64>(dims, 4, true)
        .solve_sfs(&rotated_input, &params, &mut rotated)
        .unwrap();

    assert_eq!(plain, rotated);
}

#[test]
fn test_zero_active_mask_leaves_depth_bit_identical() {
    let dims = ImageDims::new(5, 3);
    let scene = SfsScene::<f32>::from_depth(dims, flat_depth(dims, 2.0)).with_mask(vec![0.0; dims.len()]);

    for use_remapping in [true, false] {
        let mut depth: Vec<f32> = (0..dims.len()).map(|i| 0.1 * i as f32 - 0.3).collect();
        depth[4] = f32::NAN;
        let before: Vec<u32> = depth.iter().map(|d| d.to_bits()).collect();

        let mut solver = solver::<f32>(dims, 2, use_remapping);
        let report = solver
            .solve_sfs(&scene.input(), &SolverParameters::default(), &mut depth)
            .unwrap();

        assert_eq!(report.status, SolveStatus::NoActiveElements);
        assert!(!report.status.modified_field());
        assert_eq!(report.num_elements, 0);
        if use_remapping {
            assert_eq!(solver.remapper().num_active(), 0);
        }
        assert_eq!(depth.iter().map(|d| d.to_bits()).collect::<Vec<_>>(), before);
    }
}

#[test]
fn test_zero_iteration_budgets_are_no_ops() {
    let dims = ImageDims::new(6, 6);
    let scene = SfsScene::<f64>::from_depth(dims, hemisphere_depth(dims, 2.0, 2.5, 0.05));
    let start = flat_depth::<f64>(dims, 1.8);

    let no_outer = SolverParameters {
        non_linear_iterations: 0,
        ..Default::default()
    };
    let mut depth = start.clone();
    let report = solver::<f64>(dims, 3, true)
        .solve_sfs(&scene.input(), &no_outer, &mut depth)
        .unwrap();
    assert_eq!(report.status, SolveStatus::NoIterations);
    assert_eq!(depth, start);

    let no_patch = SolverParameters {
        non_linear_iterations: 3,
        patch_iterations: 0,
        ..Default::default()
    };
    let mut depth = start.clone();
    let report = solver::<f64>(dims, 3, true)
        .solve_sfs(&scene.input(), &no_patch, &mut depth)
        .unwrap();
    assert_eq!(report.status, SolveStatus::Completed);
    assert!(report.iterations.iter().all(|it| it.step_norm == 0.0));
    assert_eq!(depth, start);
}

#[test]
fn test_shading_weight_schedule() {
    let dims = ImageDims::new(4, 4);
    let scene = SfsScene::<f64>::from_depth(dims, flat_depth(dims, 2.0));
    let params = SolverParameters {
        non_linear_iterations: 4,
        weight_shading_start: 2.0,
        weight_shading_increment: 0.25,
        ..Default::default()
    };
    let mut depth = flat_depth::<f64>(dims, 2.0);
    let report = solver::<f64>(dims, 4, true)
        .solve_sfs(&scene.input(), &params, &mut depth)
        .unwrap();

    let weights: Vec<f64> = report.iterations.iter().map(|it| it.weight_shading).collect();
    assert_eq!(weights, vec![2.0, 2.25, 2.5, 2.75]);
}

#[test]
fn test_shading_refinement_reduces_cost() {
    let dims = ImageDims::new(16, 16);
    let calibration = CalibrationParams::new(20.0, 20.0, 7.5, 7.5);
    let lighting = LightingCoefficients([0.6, 0.1, -0.2, -0.4, 0.0, 0.0, 0.05, 0.0, 0.0]);
    let scene = SfsScene::<f64>::from_depth(dims, hemisphere_depth(dims, 2.0, 6.0, 0.04))
        .with_rendered_intensity(&calibration, &lighting);

    let mut depth = scene.target_depth.clone();
    add_gaussian_noise(&mut depth, 0.002, 7);
    let noisy_error = max_abs_diff(&depth, &scene.target_depth);
    assert!(noisy_error > 0.0);

    let params = SolverParameters {
        non_linear_iterations: 3,
        linear_iterations: 4,
        patch_iterations: 32,
        weight_shading_start: 1.0,
        weight_shading_increment: 0.0,
        weight_regularizer: 0.01,
        weight_boundary: 0.01,
        ..Default::default()
    };
    let mut solver = PatchSolver::<f64>::builder()
        .patch_size(16)
        .build(dims, calibration)
        .unwrap();
    let input = scene.input().with_lighting(lighting);
    let report = solver.solve_sfs(&input, &params, &mut depth).unwrap();

    let initial = report.initial_cost.unwrap();
    let last = report.final_cost.unwrap();
    test_println!("sfs cost {initial:.6e} -> {last:.6e}, noise {noisy_error:.4e}");
    assert!(last < initial);
    assert!(depth.iter().all(|d| d.is_finite()));
}

#[test]
fn test_diagnostics_sink_does_not_change_result() {
    let dims = ImageDims::new(8, 8);
    let scene = SfsScene::<f64>::from_depth(dims, hemisphere_depth(dims, 2.0, 3.0, 0.05));
    let params = SolverParameters {
        non_linear_iterations: 2,
        ..no_shading()
    };

    let mut plain = flat_depth::<f64>(dims, 1.9);
    solver::<f64>(dims, 4, true)
        .solve_sfs(&scene.input(), &params, &mut plain)
        .unwrap();

    let mut recorder = SnapshotRecorder::new();
    let mut observed = flat_depth::<f64>(dims, 1.9);
    solver::<f64>(dims, 4, true)
        .solve_sfs_with(
            &scene.input(),
            &params,
            &mut observed,
            SolveHooks::default().with_sink(&mut recorder),
        )
        .unwrap();

    assert_eq!(plain, observed);
    assert_eq!(recorder.snapshots.len(), 2 * SnapshotKind::ALL.len());
    let jtf = recorder.find(SnapshotKind::Jtf, 1).unwrap();
    assert_eq!(jtf.label, "JTF_native_block");
    assert_eq!((jtf.width, jtf.height, jtf.channels), (8, 8, 1));
}

#[test]
fn test_observer_stops_early() {
    let dims = ImageDims::new(4, 4);
    let scene = SfsScene::<f64>::from_depth(dims, flat_depth(dims, 2.0));
    let mut depth = flat_depth::<f64>(dims, 1.0);

    let mut seen = Vec::new();
    let mut observer = |report: &patch_solver::IterationReport| {
        seen.push(report.iteration);
        patch_solver::IterationControl::Stop
    };
    let report = solver::<f64>(dims, 4, true)
        .solve_sfs_with(
            &scene.input(),
            &fitting_only(5),
            &mut depth,
            SolveHooks::default().with_observer(&mut observer),
        )
        .unwrap();

    assert_eq!(report.status, SolveStatus::EarlyOut);
    assert_eq!(report.num_iterations(), 1);
    assert_eq!(seen, vec![0]);
    assert_relative_eq!(depth[0], 2.0, epsilon = 1e-12);
}

#[test]
fn test_debug_record() {
    let dims = ImageDims::new(4, 4);
    let scene = SfsScene::<f64>::from_depth(dims, flat_depth(dims, 2.0));
    let mut depth = flat_depth::<f64>(dims, 1.0);

    let (report, debug) = solver::<f64>(dims, 2, true)
        .solve_sfs_with_debug(&scene.input(), &fitting_only(2), &mut depth)
        .unwrap();

    assert_eq!(debug.problem, "sfs");
    assert_eq!(debug.backend, "native_block");
    assert_eq!(debug.num_patches, 4);
    assert_eq!(debug.iterations.len(), report.num_iterations());
    assert_relative_eq!(debug.iterations[0].step_norm, 4.0, epsilon = 1e-12);
    assert_eq!(debug.status, "Completed");

    let value: serde_json::Value = serde_json::from_str(&debug.to_json()).unwrap();
    assert_eq!(value["iterations"].as_array().unwrap().len(), 2);
}

#[test]
fn test_library_backend_matches_single_patch() {
    let dims = ImageDims::new(6, 6);
    let scene = SfsScene::<f64>::from_depth(dims, hemisphere_depth(dims, 2.0, 2.5, 0.05));
    let params = SolverParameters {
        non_linear_iterations: 2,
        linear_iterations: 4,
        patch_iterations: 64,
        ..no_shading()
    };

    let mut block = flat_depth::<f64>(dims, 1.9);
    solver::<f64>(dims, 6, true)
        .solve_sfs(&scene.input(), &params, &mut block)
        .unwrap();

    let config = PatchSolverConfig {
        patch_size: 2,
        backend: BackendKind::LibraryNlls,
        ..Default::default()
    };
    let mut global = flat_depth::<f64>(dims, 1.9);
    PatchSolver::<f64>::new(dims, CalibrationParams::new(20.0, 20.0, 1.5, 1.5), config)
        .unwrap()
        .solve_sfs(&scene.input(), &params, &mut global)
        .unwrap();

    assert!(max_abs_diff(&block, &global) < 1e-8);
}
