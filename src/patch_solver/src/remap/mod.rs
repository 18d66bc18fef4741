//! Validity mask evaluation and active-element compaction.
//!
//! The remap stage turns a dense per-element mask into a compact list of
//! active elements:
//! 1. Decision array (1 = valid element)
//! 2. Exclusive prefix sum of the decision array
//! 3. Remap table with `remap[prefix[i]] = i` for every active `i`
//!
//! # Example
//!
//! ```ignore
//! use patch_solver::{ImageDims, Remapper};
//!
//! let mut remapper = Remapper::new(dims.len());
//! remapper.compute(&mask, dims, 16);
//! for &dense in remapper.remap_table() {
//!     // visit active elements only
//! }
//! ```

mod cpu;
#[cfg(feature = "cuda")]
mod gpu;
#[cfg(feature = "cuda")]
mod kernels;

pub use cpu::{compute_decision_cpu, exclusive_scan_cpu, is_valid_mask_value, scatter_remap_cpu};
#[cfg(feature = "cuda")]
pub use gpu::GpuRemapper;
#[cfg(feature = "cuda")]
pub use kernels::{compute_decision_kernel, scatter_remap_kernel};

use tracing::trace;

#[cfg(feature = "cuda")]
use crate::types::to_f64;
use crate::types::{ImageDims, Real};

/// Reusable remap buffers, sized to the dense domain.
///
/// Every call to [`Remapper::compute`] clears the previous state before
/// recomputing, so a remapper can be reused across frames.
#[derive(Default)]
pub struct Remapper {
    decision: Vec<u32>,
    prefix_sum: Vec<u32>,
    remap: Vec<u32>,
    num_active: usize,
    use_gpu: bool,
    #[cfg(feature = "cuda")]
    gpu: Option<GpuRemapper>,
}

impl std::fmt::Debug for Remapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remapper")
            .field("capacity", &self.decision.len())
            .field("num_active", &self.num_active)
            .field("use_gpu", &self.use_gpu)
            .finish()
    }
}

impl Remapper {
    /// Create a remapper with buffers for `capacity` dense elements.
    pub fn new(capacity: usize) -> Self {
        Self {
            decision: vec![0; capacity],
            prefix_sum: vec![0; capacity],
            remap: vec![0; capacity],
            ..Default::default()
        }
    }

    /// Request the CubeCL path. Without the `cuda` feature this is ignored.
    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    /// Reset all buffers and the active count.
    pub fn clear(&mut self) {
        self.decision.fill(0);
        self.prefix_sum.fill(0);
        self.remap.fill(0);
        self.num_active = 0;
    }

    /// Recompute decision, prefix sum and remap table for `mask`.
    ///
    /// `patch_size` sets the tile shape of the GPU launch.
    ///
    /// # Panics
    /// If `mask.len() != dims.len()`.
    pub fn compute<T: Real>(&mut self, mask: &[T], dims: ImageDims, patch_size: usize) -> usize {
        let n = dims.len();
        assert_eq!(mask.len(), n, "mask does not match the grid dimensions");

        if self.decision.len() != n {
            self.decision.resize(n, 0);
            self.prefix_sum.resize(n, 0);
            self.remap.resize(n, 0);
        }
        self.clear();

        #[cfg(feature = "cuda")]
        if self.use_gpu && self.compute_gpu(mask, dims, patch_size) {
            return self.finish(n);
        }
        #[cfg(not(feature = "cuda"))]
        let _ = patch_size;

        compute_decision_cpu(mask, &mut self.decision);
        let total = exclusive_scan_cpu(&self.decision, &mut self.prefix_sum) as usize;
        assert!(total <= n, "remap count {total} exceeds dense size {n}");
        scatter_remap_cpu(&self.decision, &self.prefix_sum, &mut self.remap[..total]);
        self.finish(n)
    }

    fn finish(&mut self, n: usize) -> usize {
        self.num_active = match (self.prefix_sum.last(), self.decision.last()) {
            (Some(&p), Some(&d)) => (p + d) as usize,
            _ => 0,
        };
        assert!(
            self.num_active <= n,
            "remap count {} exceeds dense size {n}",
            self.num_active
        );
        trace!(num_active = self.num_active, dense = n, "remap computed");
        self.num_active
    }

    #[cfg(feature = "cuda")]
    fn compute_gpu<T: Real>(&mut self, mask: &[T], dims: ImageDims, patch_size: usize) -> bool {
        if self.gpu.is_none() {
            match GpuRemapper::new() {
                Ok(gpu) => self.gpu = Some(gpu),
                Err(e) => {
                    tracing::warn!("GPU remapper unavailable ({e}), falling back to CPU");
                    self.use_gpu = false;
                    return false;
                }
            }
        }
        let Some(gpu) = self.gpu.as_ref() else {
            return false;
        };

        let mask_f32: Vec<f32> = mask.iter().map(|&m| to_f64(m) as f32).collect();
        match gpu.compute(&mask_f32, dims, patch_size) {
            Ok(result) => {
                self.decision.copy_from_slice(&result.decision);
                self.prefix_sum.copy_from_slice(&result.prefix_sum);
                self.remap[..result.remap.len()].copy_from_slice(&result.remap);
                true
            }
            Err(e) => {
                tracing::warn!("GPU remap failed ({e}), falling back to CPU");
                false
            }
        }
    }

    /// Decision array of the last computation.
    pub fn decision(&self) -> &[u32] {
        &self.decision
    }

    /// Exclusive prefix sum of the last computation.
    pub fn prefix_sum(&self) -> &[u32] {
        &self.prefix_sum
    }

    /// Compacted index → dense index, strictly increasing.
    pub fn remap_table(&self) -> &[u32] {
        &self.remap[..self.num_active]
    }

    pub fn num_active(&self) -> usize {
        self.num_active
    }

    /// Dense index → compacted index, `None` for inactive elements.
    pub fn compact_index(&self, dense: usize) -> Option<usize> {
        match self.decision.get(dense) {
            Some(1) => Some(self.prefix_sum[dense] as usize),
            _ => None,
        }
    }

    /// Fraction of active elements, for logging.
    pub fn occupancy(&self) -> f64 {
        if self.decision.is_empty() {
            0.0
        } else {
            self.num_active as f64 / self.decision.len() as f64
        }
    }
}
