//! Residual and Jacobian evaluation.
//!
//! Every energy produces, per active element, a small set of scalar
//! residual rows with sparse Jacobian rows (at most [`MAX_SUPPORT`] entries).
//! The normal equations (JTJ, JTF, preconditioner) are assembled from these
//! rows in [`crate::linear::system`].

mod arap;
mod grid;
mod lighting;
mod sfs;
mod smoothing;

pub use arap::{wrap_angle, ArapEnergy, MeshInput, MeshTopology};
pub use grid::GridDomain;
pub use lighting::{sh_basis, sh_shading, sh_shading_gradient, SH_COEFFICIENTS};
pub use sfs::{warp_depth, SfsEnergy, SfsInput};
pub use smoothing::SmoothingEnergy;

use serde::{Deserialize, Serialize};

use crate::backend::NamedParam;
use crate::patch::PatchPartition;
use crate::solver::SolverParameters;
use crate::types::{ImageDims, Real};

/// Maximum number of unknowns a single residual row depends on.
pub const MAX_SUPPORT: usize = 8;

/// Problem families the solver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemKind {
    /// Depth refinement from shading (one depth per pixel).
    ShapeFromShading,
    /// Image warping / Laplacian smoothing (one value per pixel).
    LaplacianSmoothing,
    /// As-rigid-as-possible mesh deformation (position + angles per vertex).
    MeshDeformation,
}

impl ProblemKind {
    pub const ALL: [ProblemKind; 3] = [
        ProblemKind::ShapeFromShading,
        ProblemKind::LaplacianSmoothing,
        ProblemKind::MeshDeformation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProblemKind::ShapeFromShading => "sfs",
            ProblemKind::LaplacianSmoothing => "smoothing",
            ProblemKind::MeshDeformation => "arap",
        }
    }
}

/// Effective energy weights of one outer iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyWeights<T> {
    pub fitting: T,
    pub shading: T,
    pub regularizer: T,
    pub prior: T,
    pub boundary: T,
}

impl<T: Real> EnergyWeights<T> {
    /// Square roots of all weights (residual scale factors).
    pub fn sqrt(&self) -> Self {
        Self {
            fitting: self.fitting.sqrt(),
            shading: self.shading.sqrt(),
            regularizer: self.regularizer.sqrt(),
            prior: self.prior.sqrt(),
            boundary: self.boundary.sqrt(),
        }
    }
}

/// One scalar residual and its sparse Jacobian row.
#[derive(Debug, Clone, Copy)]
pub struct ResidualRow<T> {
    /// Element the residual is attributed to (per-element cost).
    pub owner: u32,
    pub value: T,
    len: u8,
    vars: [u32; MAX_SUPPORT],
    partials: [T; MAX_SUPPORT],
}

impl<T: Real> ResidualRow<T> {
    pub fn new(owner: usize, value: T) -> Self {
        Self {
            owner: owner as u32,
            value,
            len: 0,
            vars: [0; MAX_SUPPORT],
            partials: [T::zero(); MAX_SUPPORT],
        }
    }

    /// Add `partial` to `∂r/∂x[var]`. Repeated variables are merged.
    ///
    /// # Panics
    /// If the row would depend on more than [`MAX_SUPPORT`] unknowns.
    pub fn push(&mut self, var: usize, partial: T) -> &mut Self {
        let len = self.len as usize;
        if let Some(k) = self.vars[..len].iter().position(|&v| v as usize == var) {
            self.partials[k] += partial;
            return self;
        }
        assert!(len < MAX_SUPPORT, "residual row exceeds {MAX_SUPPORT} unknowns");
        self.vars[len] = var as u32;
        self.partials[len] = partial;
        self.len += 1;
        self
    }

    /// `(variable, partial)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (usize, T)> + '_ {
        self.vars[..self.len as usize]
            .iter()
            .zip(&self.partials[..self.len as usize])
            .map(|(&v, &p)| (v as usize, p))
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `J_k · x`
    #[inline]
    pub fn dot(&self, x: &[T]) -> T {
        self.entries()
            .fold(T::zero(), |acc, (v, p)| acc + p * x[v])
    }
}

/// A least-squares energy over a field of unknowns.
///
/// Unknown `c` of element `e` lives at variable index
/// `e * unknowns_per_element() + c`.
pub trait Energy<T: Real>: Sync {
    fn kind(&self) -> ProblemKind;

    /// Number of solver elements (active pixels or vertices).
    fn num_elements(&self) -> usize;

    /// Elements that own residuals. Lower than [`num_elements`](Self::num_elements)
    /// when a dense grid carries masked pixels.
    fn num_active(&self) -> usize {
        self.num_elements()
    }

    fn unknowns_per_element(&self) -> usize;

    fn num_variables(&self) -> usize {
        self.num_elements() * self.unknowns_per_element()
    }

    fn partition(&self) -> &PatchPartition;

    /// Append the residual rows owned by `element` to `out`.
    fn element_residuals(&self, element: usize, weights: &EnergyWeights<T>, out: &mut Vec<ResidualRow<T>>);

    /// `x ← x + delta` for every active unknown.
    fn apply_step(&mut self, delta: &[T]);

    /// Dense grid shape used for diagnostics snapshots.
    fn snapshot_dims(&self) -> ImageDims;

    /// Position of `element` in a dense snapshot.
    fn dense_index(&self, element: usize) -> usize;

    /// Parameters in the order external plans expect them.
    fn named_parameters(&self, params: &SolverParameters) -> Vec<NamedParam>;
}
