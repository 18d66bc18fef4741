//! Jacobi-preconditioned conjugate gradient on the Gauss-Newton system
//! `JᵀJ δ = -Jᵀr`.
//!
//! The block variant is an additive Schwarz iteration: every pass computes
//! the global residual `b - A δ`, solves each patch-restricted system
//! `A_PP e_P = r_P` with a fixed number of PCG iterations (patches in
//! parallel), and only then applies `δ_P += e_P`. Coupling across patch
//! boundaries is picked up by the next pass.

use rayon::prelude::*;
use tracing::trace;

use super::system::LinearSystem;
use crate::patch::{Patch, PatchPartition};
use crate::types::{real, Real};

/// CG denominators at or below this are treated as zero.
const DEGENERATE_DENOMINATOR: f64 = 1e-30;

#[inline]
fn dot<T: Real>(a: &[T], b: &[T]) -> T {
    a.iter().zip(b).fold(T::zero(), |acc, (&x, &y)| acc + x * y)
}

/// Fixed-budget PCG state over `n` unknowns.
struct Pcg<T> {
    x: Vec<T>,
    r: Vec<T>,
    z: Vec<T>,
    p: Vec<T>,
    ap: Vec<T>,
    precond: Vec<T>,
    rz: T,
}

impl<T: Real> Pcg<T> {
    fn new(residual: Vec<T>, precond: Vec<T>) -> Self {
        let n = residual.len();
        let z: Vec<T> = residual.iter().zip(&precond).map(|(&r, &m)| r * m).collect();
        let rz = dot(&residual, &z);
        Self {
            x: vec![T::zero(); n],
            p: z.clone(),
            r: residual,
            z,
            ap: vec![T::zero(); n],
            precond,
            rz,
        }
    }

    /// One CG iteration given `apply(p, out)` computing `A p`.
    fn step<F: FnMut(&[T], &mut [T])>(&mut self, mut apply: F) {
        apply(&self.p, &mut self.ap);
        let denom = dot(&self.p, &self.ap);
        let tiny = real::<T>(DEGENERATE_DENOMINATOR);

        let alpha = if denom > tiny && denom.is_finite() {
            self.rz / denom
        } else {
            trace!("degenerate PCG denominator, zero step");
            T::zero()
        };

        for i in 0..self.x.len() {
            self.x[i] += alpha * self.p[i];
            self.r[i] -= alpha * self.ap[i];
            self.z[i] = self.r[i] * self.precond[i];
        }

        let rz_new = dot(&self.r, &self.z);
        let beta = if self.rz > tiny { rz_new / self.rz } else { T::zero() };
        for (p, &z) in self.p.iter_mut().zip(&self.z) {
            *p = z + beta * *p;
        }
        self.rz = rz_new;
    }
}

/// Global PCG over every variable, starting from `δ = 0`.
pub fn solve_global_pcg<T: Real>(system: &LinearSystem<T>, iterations: usize) -> Vec<T> {
    let b: Vec<T> = system.jtf().iter().map(|&g| -g).collect();
    let mut pcg = Pcg::new(b, system.preconditioner());
    for _ in 0..iterations {
        pcg.step(|p, out| system.apply_jtj(p, out));
    }
    pcg.x
}

/// Block (patch-restricted) PCG with explicit boundary exchange.
///
/// # Arguments
/// * `system` - Normal equations at the current estimate
/// * `partition` - Patch partition of the elements
/// * `unknowns` - Unknowns per element
/// * `linear_iterations` - Block passes (global residual refreshes)
/// * `patch_iterations` - PCG iterations per patch and pass
///
/// # Returns
/// The step `δ`; all zeros when either iteration count is 0.
pub fn solve_block_pcg<T: Real>(
    system: &LinearSystem<T>,
    partition: &PatchPartition,
    unknowns: usize,
    linear_iterations: usize,
    patch_iterations: usize,
) -> Vec<T> {
    let n = system.num_variables();
    let mut delta = vec![T::zero(); n];
    if linear_iterations == 0 || patch_iterations == 0 {
        return delta;
    }

    let precond = system.preconditioner();
    let mut a_delta = vec![T::zero(); n];

    for pass in 0..linear_iterations {
        // r = b - A δ with b = -JTF
        if pass > 0 {
            system.apply_jtj(&delta, &mut a_delta);
        }
        let residual: Vec<T> = system
            .jtf()
            .iter()
            .zip(&a_delta)
            .map(|(&g, &ad)| -g - ad)
            .collect();

        let updates: Vec<(Vec<usize>, Vec<T>)> = partition
            .patches()
            .par_iter()
            .enumerate()
            .map(|(slot, patch)| {
                solve_patch(system, partition, slot, patch, unknowns, &residual, &precond, patch_iterations)
            })
            .collect();

        // Barrier: every patch saw the same residual.
        for (vars, e) in updates {
            for (v, x) in vars.into_iter().zip(e) {
                delta[v] += x;
            }
        }
    }

    delta
}

#[allow(clippy::too_many_arguments)]
fn solve_patch<T: Real>(
    system: &LinearSystem<T>,
    partition: &PatchPartition,
    slot: usize,
    patch: &Patch,
    unknowns: usize,
    residual: &[T],
    precond: &[T],
    iterations: usize,
) -> (Vec<usize>, Vec<T>) {
    let vars: Vec<usize> = patch
        .members
        .iter()
        .flat_map(|&e| (0..unknowns).map(move |c| e as usize * unknowns + c))
        .collect();
    let local = |v: usize| {
        let e = v / unknowns;
        (partition.slot_of(e) == slot).then(|| partition.local_index(e) * unknowns + v % unknowns)
    };

    let r = vars.iter().map(|&v| residual[v]).collect();
    let m = vars.iter().map(|&v| precond[v]).collect();
    let mut pcg = Pcg::new(r, m);
    for _ in 0..iterations {
        pcg.step(|p, out| system.apply_jtj_local(&vars, local, p, out));
    }
    (vars, pcg.x)
}
