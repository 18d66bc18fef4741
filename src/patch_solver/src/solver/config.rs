//! Solver instance configuration and builder.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{MeshSolver, PatchSolver};
use crate::backend::{BackendKind, BackendRegistry};
use crate::error::Result;
use crate::types::{CalibrationParams, ImageDims, Real};

/// Configuration of a [`PatchSolver`] / [`MeshSolver`] instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchSolverConfig {
    /// Tile edge length for grids. Meshes use chunks of
    /// `patch_size * patch_size` vertices.
    pub patch_size: usize,

    /// Compact the active elements with the remap stage before solving.
    pub use_remapping: bool,

    /// Backend looked up in the registry.
    pub backend: BackendKind,

    /// Run the remap stage with CubeCL (`cuda` feature), falling back to CPU.
    pub use_gpu: bool,
}

impl Default for PatchSolverConfig {
    fn default() -> Self {
        Self {
            patch_size: 16,
            use_remapping: true,
            backend: BackendKind::NativeBlock,
            use_gpu: false,
        }
    }
}

/// Builder for [`PatchSolver`] and [`MeshSolver`].
///
/// # Example
///
/// ```ignore
/// let solver = PatchSolver::<f32>::builder()
///     .patch_size(16)
///     .remapping(true)
///     .backend(BackendKind::NativeBlock)
///     .build(dims, calibration)?;
/// ```
pub struct PatchSolverBuilder<T: Real> {
    config: PatchSolverConfig,
    registry: Option<Arc<BackendRegistry<T>>>,
}

impl<T: Real> Default for PatchSolverBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Real> PatchSolverBuilder<T> {
    pub fn new() -> Self {
        Self {
            config: PatchSolverConfig::default(),
            registry: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PatchSolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn patch_size(mut self, patch_size: usize) -> Self {
        self.config.patch_size = patch_size;
        self
    }

    pub fn remapping(mut self, enabled: bool) -> Self {
        self.config.use_remapping = enabled;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn use_gpu(mut self, enabled: bool) -> Self {
        self.config.use_gpu = enabled;
        self
    }

    /// Share a backend registry (e.g. one holding compiled plans).
    pub fn registry(mut self, registry: Arc<BackendRegistry<T>>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn take_registry(&mut self) -> Arc<BackendRegistry<T>> {
        self.registry
            .take()
            .unwrap_or_else(|| Arc::new(BackendRegistry::with_native_backends()))
    }

    /// Build a grid solver.
    pub fn build(mut self, dims: ImageDims, calibration: CalibrationParams) -> Result<PatchSolver<T>> {
        let registry = self.take_registry();
        PatchSolver::with_registry(dims, calibration, self.config, registry)
    }

    /// Build a mesh solver.
    pub fn build_mesh(mut self) -> Result<MeshSolver<T>> {
        let registry = self.take_registry();
        MeshSolver::with_registry(self.config, registry)
    }
}
