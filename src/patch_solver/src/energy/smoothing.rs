//! Laplacian smoothing / image warping energy.
//!
//! One scalar per pixel: `sqrt(w_fit)(x_i - t_i)` plus the pairwise term
//! `sqrt(w_reg)(x_i - x_j)` towards the right and lower active neighbors.

use super::grid::GridDomain;
use super::{Energy, EnergyWeights, ProblemKind, ResidualRow};
use crate::backend::{NamedParam, ParamValue};
use crate::patch::PatchPartition;
use crate::solver::SolverParameters;
use crate::types::{ImageDims, Real};

pub struct SmoothingEnergy<'a, T: Real> {
    domain: GridDomain,
    target: &'a [T],
    image: &'a mut [T],
}

impl<'a, T: Real> SmoothingEnergy<'a, T> {
    /// Non-finite target values leave the pixel unconstrained.
    pub fn new(domain: GridDomain, target: &'a [T], image: &'a mut [T]) -> Self {
        Self {
            domain,
            target,
            image,
        }
    }
}

impl<T: Real> Energy<T> for SmoothingEnergy<'_, T> {
    fn kind(&self) -> ProblemKind {
        ProblemKind::LaplacianSmoothing
    }

    fn num_elements(&self) -> usize {
        self.domain.num_elements()
    }

    fn num_active(&self) -> usize {
        self.domain.num_active()
    }

    fn unknowns_per_element(&self) -> usize {
        1
    }

    fn partition(&self) -> &PatchPartition {
        self.domain.partition()
    }

    fn element_residuals(&self, e: usize, weights: &EnergyWeights<T>, out: &mut Vec<ResidualRow<T>>) {
        if !self.domain.is_active(e) {
            return;
        }
        let w = weights.sqrt();
        let dense = self.domain.dense_of(e);
        let value = self.image[dense];

        let target = self.target[dense];
        if w.fitting > T::zero() && target.is_finite() {
            let mut row = ResidualRow::new(e, w.fitting * (value - target));
            row.push(e, w.fitting);
            out.push(row);
        }

        if w.regularizer > T::zero() {
            let (x, y) = self.domain.coords_of(e);
            let (x, y) = (x as isize, y as isize);
            for n in [(x + 1, y), (x, y + 1)]
                .into_iter()
                .filter_map(|(nx, ny)| self.domain.element_at(nx, ny))
            {
                let other = self.image[self.domain.dense_of(n)];
                let mut row = ResidualRow::new(e, w.regularizer * (value - other));
                row.push(e, w.regularizer).push(n, -w.regularizer);
                out.push(row);
            }
        }
    }

    fn apply_step(&mut self, delta: &[T]) {
        for e in 0..self.domain.num_elements() {
            if self.domain.is_active(e) {
                let dense = self.domain.dense_of(e);
                self.image[dense] += delta[e];
            }
        }
    }

    fn snapshot_dims(&self) -> ImageDims {
        self.domain.dims()
    }

    fn dense_index(&self, element: usize) -> usize {
        self.domain.dense_of(element)
    }

    fn named_parameters(&self, params: &SolverParameters) -> Vec<NamedParam> {
        let mut values = vec![
            NamedParam::new("weightFitting", ParamValue::Float(params.weight_fitting)),
            NamedParam::new("weightRegularizer", ParamValue::Float(params.weight_regularizer)),
        ];
        values.extend(params.iteration_values());
        values
    }
}
