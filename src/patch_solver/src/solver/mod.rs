//! High-level solver API.
//!
//! [`PatchSolver`] handles the per-pixel problems (shape-from-shading and
//! Laplacian smoothing) on a fixed grid and owns the reusable remap buffers.
//! [`MeshSolver`] handles as-rigid-as-possible mesh deformation. Both check
//! every precondition once, build the energy, and hand it to the backend
//! selected from the registry.

mod config;
mod debug;
pub mod driver;
mod params;
mod types;

pub use config::{PatchSolverBuilder, PatchSolverConfig};
pub use debug::{IterationDebug, SolveDebug};
pub use params::SolverParameters;
pub use types::{
    IterationControl, IterationObserver, IterationReport, SolveHooks, SolveReport, SolveStatus,
};

use std::sync::Arc;

use tracing::debug;

use crate::backend::BackendRegistry;
use crate::energy::{
    ArapEnergy, Energy, GridDomain, MeshInput, ProblemKind, SfsEnergy, SfsInput, SmoothingEnergy,
};
use crate::error::{check_len, Result, SolverError};
use crate::remap::Remapper;
use crate::timing::{phase, Timer};
use crate::types::{real, CalibrationParams, ImageDims, Real};

fn check_patch_size(patch_size: usize) -> Result<()> {
    if patch_size == 0 {
        return Err(SolverError::InvalidParameter {
            name: "patch_size",
            reason: "must be non-zero".into(),
        });
    }
    Ok(())
}

/// Solver for per-pixel problems on a fixed grid.
///
/// # Example
///
/// ```ignore
/// let mut solver = PatchSolver::<f32>::new(dims, calibration, PatchSolverConfig::default())?;
/// let input = SfsInput::new(&target, &intensity, &previous, &mask, &edge_row, &edge_col)
///     .with_lighting(lighting);
/// let report = solver.solve_sfs(&input, &params, &mut depth)?;
/// ```
pub struct PatchSolver<T: Real> {
    config: PatchSolverConfig,
    dims: ImageDims,
    calibration: CalibrationParams,
    remapper: Remapper,
    registry: Arc<BackendRegistry<T>>,
}

impl<T: Real> std::fmt::Debug for PatchSolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchSolver")
            .field("config", &self.config)
            .field("dims", &self.dims)
            .field("calibration", &self.calibration)
            .field("remapper", &self.remapper)
            .finish()
    }
}

impl<T: Real> PatchSolver<T> {
    pub fn builder() -> PatchSolverBuilder<T> {
        PatchSolverBuilder::new()
    }

    /// Create a solver with the native backends.
    pub fn new(dims: ImageDims, calibration: CalibrationParams, config: PatchSolverConfig) -> Result<Self> {
        Self::with_registry(
            dims,
            calibration,
            config,
            Arc::new(BackendRegistry::with_native_backends()),
        )
    }

    /// Create a solver sharing `registry`.
    pub fn with_registry(
        dims: ImageDims,
        calibration: CalibrationParams,
        config: PatchSolverConfig,
        registry: Arc<BackendRegistry<T>>,
    ) -> Result<Self> {
        check_patch_size(config.patch_size)?;
        if dims.is_empty() {
            return Err(SolverError::EmptyDomain {
                width: dims.width,
                height: dims.height,
            });
        }
        let remapper = Remapper::new(dims.len()).with_gpu(config.use_gpu);
        Ok(Self {
            config,
            dims,
            calibration,
            remapper,
            registry,
        })
    }

    pub fn config(&self) -> &PatchSolverConfig {
        &self.config
    }

    pub fn dims(&self) -> ImageDims {
        self.dims
    }

    pub fn calibration(&self) -> &CalibrationParams {
        &self.calibration
    }

    /// Remap buffers of the last remapped solve.
    pub fn remapper(&self) -> &Remapper {
        &self.remapper
    }

    /// Build the element domain, recomputing the remap table when enabled.
    fn domain(&mut self, mask: &[T]) -> (GridDomain, f64) {
        let timer = Timer::new(phase::REMAP);
        let domain = if self.config.use_remapping {
            self.remapper.compute(mask, self.dims, self.config.patch_size);
            debug!(
                active = self.remapper.num_active(),
                occupancy = self.remapper.occupancy(),
                "remap computed"
            );
            GridDomain::remapped(self.dims, &self.remapper, self.config.patch_size)
        } else {
            GridDomain::dense(self.dims, mask, self.config.patch_size)
        };
        (domain, timer.elapsed_ms())
    }

    fn run(
        &self,
        energy: &mut dyn Energy<T>,
        params: &SolverParameters,
        hooks: &mut SolveHooks<'_>,
        remap_ms: f64,
    ) -> Result<SolveReport> {
        let solver = self.registry.get(energy.kind(), self.config.backend)?;
        let report = solver.solve(energy, params, hooks)?;
        if let Some(timing) = hooks.debug.as_deref_mut().and_then(|d| d.timing.as_mut()) {
            timing.remap_ms = remap_ms;
        }
        Ok(report)
    }

    /// Refine `depth` in place by shape-from-shading.
    pub fn solve_sfs(&mut self, input: &SfsInput<'_, T>, params: &SolverParameters, depth: &mut [T]) -> Result<SolveReport> {
        self.solve_sfs_with(input, params, depth, SolveHooks::default())
    }

    /// [`solve_sfs`](Self::solve_sfs) with a diagnostics sink, observer or debug record.
    pub fn solve_sfs_with(
        &mut self,
        input: &SfsInput<'_, T>,
        params: &SolverParameters,
        depth: &mut [T],
        mut hooks: SolveHooks<'_>,
    ) -> Result<SolveReport> {
        params.validate()?;
        input.validate(self.dims)?;
        check_len("depth", depth, self.dims.len())?;
        self.registry.get(ProblemKind::ShapeFromShading, self.config.backend)?;

        let (domain, remap_ms) = self.domain(input.depth_mask);
        let mut energy = SfsEnergy::new(domain, self.calibration, input, depth);
        self.run(&mut energy, params, &mut hooks, remap_ms)
    }

    /// Shape-from-shading solve returning the debug record as well.
    pub fn solve_sfs_with_debug(
        &mut self,
        input: &SfsInput<'_, T>,
        params: &SolverParameters,
        depth: &mut [T],
    ) -> Result<(SolveReport, SolveDebug)> {
        let mut debug = SolveDebug::new();
        let report = self.solve_sfs_with(input, params, depth, SolveHooks::default().with_debug(&mut debug))?;
        Ok((report, debug))
    }

    /// Smooth `image` in place towards `target` (image warping / Laplacian
    /// smoothing). Pixels with an invalid `mask` value are left untouched.
    pub fn solve_smoothing(
        &mut self,
        target: &[T],
        mask: &[T],
        params: &SolverParameters,
        image: &mut [T],
    ) -> Result<SolveReport> {
        self.solve_smoothing_with(target, mask, params, image, SolveHooks::default())
    }

    pub fn solve_smoothing_with(
        &mut self,
        target: &[T],
        mask: &[T],
        params: &SolverParameters,
        image: &mut [T],
        mut hooks: SolveHooks<'_>,
    ) -> Result<SolveReport> {
        params.validate()?;
        let n = self.dims.len();
        check_len("target", target, n)?;
        check_len("mask", mask, n)?;
        check_len("image", image, n)?;
        self.registry.get(ProblemKind::LaplacianSmoothing, self.config.backend)?;

        let (domain, remap_ms) = self.domain(mask);
        let mut energy = SmoothingEnergy::new(domain, target, image);
        self.run(&mut energy, params, &mut hooks, remap_ms)
    }
}

/// Solver for as-rigid-as-possible mesh deformation.
pub struct MeshSolver<T: Real> {
    config: PatchSolverConfig,
    registry: Arc<BackendRegistry<T>>,
}

impl<T: Real> std::fmt::Debug for MeshSolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshSolver").field("config", &self.config).finish()
    }
}

impl<T: Real> MeshSolver<T> {
    pub fn new(config: PatchSolverConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(BackendRegistry::with_native_backends()))
    }

    pub fn with_registry(config: PatchSolverConfig, registry: Arc<BackendRegistry<T>>) -> Result<Self> {
        check_patch_size(config.patch_size)?;
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &PatchSolverConfig {
        &self.config
    }

    /// Vertices per patch.
    pub fn chunk_size(&self) -> usize {
        self.config.patch_size * self.config.patch_size
    }

    /// Deform the mesh in place: `positions` and `angles` hold 3 values per vertex.
    pub fn solve(
        &self,
        input: &MeshInput<'_, T>,
        params: &SolverParameters,
        positions: &mut [T],
        angles: &mut [T],
    ) -> Result<SolveReport> {
        self.solve_with(input, params, positions, angles, SolveHooks::default())
    }

    pub fn solve_with(
        &self,
        input: &MeshInput<'_, T>,
        params: &SolverParameters,
        positions: &mut [T],
        angles: &mut [T],
        mut hooks: SolveHooks<'_>,
    ) -> Result<SolveReport> {
        params.validate()?;
        input.validate()?;
        let n = input.num_vertices() * 3;
        check_len("positions", positions, n)?;
        check_len("angles", angles, n)?;

        let solver = self.registry.get(ProblemKind::MeshDeformation, self.config.backend)?;
        let mut energy = ArapEnergy::new(input, self.chunk_size(), positions, angles);
        solver.solve(&mut energy, params, &mut hooks)
    }

    /// Move the constraints towards their targets in `steps` equal
    /// increments, solving after each one (`alpha = (i + 1) / steps`).
    /// Interpolation starts at the current positions. Free vertices stay free.
    pub fn solve_interpolated(
        &self,
        input: &MeshInput<'_, T>,
        params: &SolverParameters,
        steps: usize,
        positions: &mut [T],
        angles: &mut [T],
    ) -> Result<Vec<SolveReport>> {
        input.validate()?;
        check_len("positions", positions, input.num_vertices() * 3)?;

        let start = positions.to_vec();
        let mut reports = Vec::with_capacity(steps);
        let mut constraints = vec![T::zero(); input.constraints.len()];

        for step in 0..steps {
            let alpha = real::<T>((step + 1) as f64 / steps as f64);
            for v in 0..input.num_vertices() {
                let target = input.constraint(v);
                for c in 0..3 {
                    let i = 3 * v + c;
                    constraints[i] = match target {
                        Some(t) => start[i] + alpha * (t[c] - start[i]),
                        None => input.constraints[i],
                    };
                }
            }
            let step_input = MeshInput::new(input.rest_positions, input.topology, &constraints);
            reports.push(self.solve(&step_input, params, positions, angles)?);
        }
        Ok(reports)
    }
}
