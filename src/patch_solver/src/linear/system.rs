//! Gauss-Newton normal equations assembled from residual rows.
//!
//! `JTJ` is never formed. Products are computed matrix-free as `Jᵀ(J p)`,
//! using the rows for `J p` and a per-variable incidence list (CSR built by
//! count / exclusive scan / fill) for `Jᵀ q`.

use rayon::prelude::*;

use crate::energy::{Energy, EnergyWeights, ResidualRow};
use crate::remap::exclusive_scan_cpu;
use crate::types::Real;

/// Linearized system at the current estimate.
#[derive(Debug, Clone)]
pub struct LinearSystem<T> {
    num_variables: usize,
    rows: Vec<ResidualRow<T>>,
    incidence_offsets: Vec<u32>,
    incidence: Vec<(u32, T)>,
    jtf: Vec<T>,
    jtj_diag: Vec<T>,
}

impl<T: Real> LinearSystem<T> {
    /// Evaluate all residuals of `energy` in parallel and assemble.
    pub fn evaluate<E: Energy<T> + ?Sized>(energy: &E, weights: &EnergyWeights<T>) -> Self {
        let rows: Vec<ResidualRow<T>> = (0..energy.num_elements())
            .into_par_iter()
            .flat_map_iter(|e| {
                let mut out = Vec::new();
                energy.element_residuals(e, weights, &mut out);
                out
            })
            .collect();
        Self::assemble(energy.num_variables(), rows)
    }

    /// Build the incidence lists, JTF and the JTJ diagonal.
    pub fn assemble(num_variables: usize, rows: Vec<ResidualRow<T>>) -> Self {
        let mut counts = vec![0u32; num_variables];
        for row in &rows {
            for (v, _) in row.entries() {
                counts[v] += 1;
            }
        }

        let mut incidence_offsets = vec![0u32; num_variables];
        let total = exclusive_scan_cpu(&counts, &mut incidence_offsets);
        incidence_offsets.push(total);

        let mut incidence = vec![(0u32, T::zero()); total as usize];
        let mut cursor = incidence_offsets.clone();
        for (k, row) in rows.iter().enumerate() {
            for (v, partial) in row.entries() {
                incidence[cursor[v] as usize] = (k as u32, partial);
                cursor[v] += 1;
            }
        }

        let mut system = Self {
            num_variables,
            rows,
            incidence_offsets,
            incidence,
            jtf: Vec::new(),
            jtj_diag: Vec::new(),
        };

        let (jtf, jtj_diag): (Vec<T>, Vec<T>) = (0..num_variables)
            .into_par_iter()
            .map(|v| {
                system.column(v).iter().fold(
                    (T::zero(), T::zero()),
                    |(g, d), &(k, p)| (g + p * system.rows[k as usize].value, d + p * p),
                )
            })
            .unzip();
        system.jtf = jtf;
        system.jtj_diag = jtj_diag;
        system
    }

    /// `(row, ∂r_row/∂x_v)` for every row touching variable `v`.
    #[inline]
    pub fn column(&self, v: usize) -> &[(u32, T)] {
        &self.incidence[self.incidence_offsets[v] as usize..self.incidence_offsets[v + 1] as usize]
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    pub fn rows(&self) -> &[ResidualRow<T>] {
        &self.rows
    }

    /// `Jᵀ r`
    pub fn jtf(&self) -> &[T] {
        &self.jtf
    }

    /// Diagonal of `JᵀJ`.
    pub fn jtj_diag(&self) -> &[T] {
        &self.jtj_diag
    }

    /// Jacobi preconditioner `1 / diag(JᵀJ)`, 0 where the diagonal vanishes.
    pub fn preconditioner(&self) -> Vec<T> {
        self.jtj_diag.iter().map(|&d| jacobi(d)).collect()
    }

    /// `Σ r²`
    pub fn cost(&self) -> T {
        self.rows
            .par_iter()
            .map(|r| r.value * r.value)
            .reduce(T::zero, |a, b| a + b)
    }

    /// `Σ r²` of the rows owned by each element.
    pub fn element_costs(&self, num_elements: usize) -> Vec<T> {
        let mut costs = vec![T::zero(); num_elements];
        for row in &self.rows {
            costs[row.owner as usize] += row.value * row.value;
        }
        costs
    }

    /// `out = JᵀJ p` over all variables.
    pub fn apply_jtj(&self, p: &[T], out: &mut [T]) {
        let jp: Vec<T> = self.rows.par_iter().map(|r| r.dot(p)).collect();
        out.par_iter_mut().enumerate().for_each(|(v, o)| {
            *o = self
                .column(v)
                .iter()
                .fold(T::zero(), |acc, &(k, partial)| acc + partial * jp[k as usize]);
        });
    }

    /// Product with the block of `JᵀJ` restricted to one patch.
    ///
    /// `vars` lists the global variables of the patch (local order), `local`
    /// maps a global variable to its local slot or `None` outside the patch.
    pub fn apply_jtj_local<F>(&self, vars: &[usize], local: F, p: &[T], out: &mut [T])
    where
        F: Fn(usize) -> Option<usize>,
    {
        for (o, &v) in out.iter_mut().zip(vars) {
            *o = self.column(v).iter().fold(T::zero(), |acc, &(k, partial)| {
                let jp = self.rows[k as usize]
                    .entries()
                    .filter_map(|(j, pj)| local(j).map(|l| pj * p[l]))
                    .fold(T::zero(), |a, b| a + b);
                acc + partial * jp
            });
        }
    }
}

/// Jacobi scaling, 0 for a vanishing or non-finite diagonal.
#[inline]
pub(crate) fn jacobi<T: Real>(diag: T) -> T {
    if diag > T::zero() && diag.is_finite() {
        T::one() / diag
    } else {
        T::zero()
    }
}

/// Cost of `energy` without assembling the normal equations.
pub fn evaluate_cost<T: Real, E: Energy<T> + ?Sized>(energy: &E, weights: &EnergyWeights<T>) -> T {
    (0..energy.num_elements())
        .into_par_iter()
        .map_init(Vec::new, |out, e| {
            out.clear();
            energy.element_residuals(e, weights, out);
            out.iter().fold(T::zero(), |acc, r| acc + r.value * r.value)
        })
        .reduce(T::zero, |a, b| a + b)
}
