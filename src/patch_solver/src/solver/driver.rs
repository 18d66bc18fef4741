//! Outer Gauss-Newton loop.
//!
//! `{evaluate → linear solve → apply} × n_nonlinear`, strictly sequential.
//! Iteration `k` uses the shading weight `start + increment * k`.

use tracing::{debug, info};

use super::debug::IterationDebug;
use super::params::SolverParameters;
use super::types::{IterationControl, IterationReport, SolveHooks, SolveReport, SolveStatus};
use crate::diagnostics::emit_snapshots;
use crate::energy::Energy;
use crate::linear::{evaluate_cost, solve_block_pcg, solve_global_pcg, LinearStrategy, LinearSystem};
use crate::time_phase;
use crate::timing::TimingCollector;
use crate::types::{to_f64, Real};

fn norm<T: Real>(values: &[T]) -> f64 {
    to_f64(values.iter().fold(T::zero(), |acc, &v| acc + v * v).sqrt())
}

/// Run the nonlinear solve on `energy`, updating its unknowns in place.
///
/// Preconditions are checked by the caller; this function does not fail.
pub fn run<T: Real>(
    energy: &mut dyn Energy<T>,
    params: &SolverParameters,
    strategy: LinearStrategy,
    backend: &str,
    hooks: &mut SolveHooks<'_>,
) -> SolveReport {
    let num_elements = energy.num_active();
    let num_patches = energy.partition().num_patches();
    let problem = energy.kind().name();

    if let Some(dbg) = hooks.debug.as_deref_mut() {
        dbg.problem = problem.to_string();
        dbg.backend = backend.to_string();
        dbg.num_elements = num_elements;
        dbg.num_patches = num_patches;
        dbg.num_boundary = energy.partition().num_boundary();
    }

    let early = if num_elements == 0 {
        Some(SolveStatus::NoActiveElements)
    } else if params.non_linear_iterations == 0 {
        Some(SolveStatus::NoIterations)
    } else {
        None
    };
    if let Some(status) = early {
        debug!(problem, ?status, "nothing to solve");
        if let Some(dbg) = hooks.debug.as_deref_mut() {
            dbg.status = format!("{status:?}");
        }
        return SolveReport::unchanged(status, num_elements, num_patches);
    }

    info!(
        problem,
        backend,
        num_elements,
        num_patches,
        non_linear = params.non_linear_iterations,
        linear = params.linear_iterations,
        patch = params.patch_iterations,
        "starting solve"
    );

    let unknowns = energy.unknowns_per_element();
    let mut timing = TimingCollector::new();
    timing.start_solve();

    let mut status = SolveStatus::Completed;
    let mut iterations = Vec::with_capacity(params.non_linear_iterations);
    let mut weights = params.weights_at::<T>(0);

    for k in 0..params.non_linear_iterations {
        timing.start_iteration();
        weights = params.weights_at::<T>(k);

        let system = time_phase!(timing, crate::timing::phase::EVALUATE, LinearSystem::evaluate(&*energy, &weights));

        if let Some(sink) = hooks.sink.as_deref_mut() {
            emit_snapshots(sink, &*energy, &system, k, backend);
        }

        let delta = time_phase!(timing, crate::timing::phase::LINEAR_SOLVE, {
            match strategy {
                LinearStrategy::BlockPcg => solve_block_pcg(
                    &system,
                    energy.partition(),
                    unknowns,
                    params.linear_iterations,
                    params.patch_iterations,
                ),
                LinearStrategy::GlobalPcg => {
                    solve_global_pcg(&system, params.linear_iterations * params.patch_iterations)
                }
            }
        });

        time_phase!(timing, crate::timing::phase::APPLY, energy.apply_step(&delta));
        let iteration_timing = timing.end_iteration();

        let report = IterationReport {
            iteration: k,
            cost: to_f64(system.cost()),
            weight_shading: params.weight_shading(k),
            step_norm: norm(&delta),
            num_residuals: system.rows().len(),
        };
        debug!(
            iteration = k,
            cost = report.cost,
            weight_shading = report.weight_shading,
            step_norm = report.step_norm,
            "outer iteration"
        );

        if let Some(dbg) = hooks.debug.as_deref_mut() {
            let mut it = IterationDebug::new(k);
            it.weight_shading = report.weight_shading;
            it.cost = report.cost;
            it.jtf_norm = norm(system.jtf());
            it.num_residuals = report.num_residuals;
            it.set_step(&delta.iter().map(|&d| to_f64(d)).collect::<Vec<_>>());
            it.timing = iteration_timing;
            dbg.iterations.push(it);
        }

        let control = hooks
            .observer
            .as_deref_mut()
            .map_or(IterationControl::Continue, |o| o.on_iteration(&report));
        iterations.push(report);

        if control == IterationControl::Stop {
            status = SolveStatus::EarlyOut;
            break;
        }
    }

    let final_cost = to_f64(evaluate_cost(&*energy, &weights));
    let solve_timing = timing.finish();

    info!(
        problem,
        backend,
        ?status,
        iterations = iterations.len(),
        initial_cost = ?iterations.first().map(|r| r.cost),
        final_cost,
        "solve finished"
    );

    if let Some(dbg) = hooks.debug.as_deref_mut() {
        dbg.status = format!("{status:?}");
        dbg.final_cost = Some(final_cost);
        dbg.timing = solve_timing;
    }

    SolveReport {
        status,
        initial_cost: iterations.first().map(|r| r.cost),
        final_cost: Some(final_cost),
        iterations,
        num_elements,
        num_patches,
    }
}
