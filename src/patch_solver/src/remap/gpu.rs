//! CubeCL remap pipeline (decision kernel, host scan, scatter kernel).

use anyhow::{ensure, Result};
use cubecl::cuda::{CudaDevice, CudaRuntime};
use cubecl::prelude::*;

use super::cpu::exclusive_scan_cpu;
use super::kernels::{compute_decision_kernel, scatter_remap_kernel};
use crate::types::ImageDims;

/// Buffers read back from the device.
#[derive(Debug, Clone)]
pub struct GpuRemapResult {
    pub decision: Vec<u32>,
    pub prefix_sum: Vec<u32>,
    pub remap: Vec<u32>,
}

/// GPU remapper holding a CUDA compute client.
pub struct GpuRemapper {
    client: cubecl::client::ComputeClient<<CudaRuntime as Runtime>::Server>,
}

impl GpuRemapper {
    /// Create a remapper on CUDA device 0.
    pub fn new() -> Result<Self> {
        let device = CudaDevice::new(0);
        let client = std::panic::catch_unwind(|| CudaRuntime::client(&device))
            .map_err(|_| anyhow::anyhow!("failed to create CUDA client"))?;
        Ok(Self { client })
    }

    /// Run the remap pipeline for a dense f32 mask.
    pub fn compute(&self, mask: &[f32], dims: ImageDims, patch_size: usize) -> Result<GpuRemapResult> {
        let n = dims.len();
        ensure!(mask.len() == n, "mask has {} elements, expected {n}", mask.len());
        ensure!(n > 0, "empty remap domain");

        let tile = patch_size.clamp(1, 32) as u32;
        let width = dims.width as u32;
        let height = dims.height as u32;
        let num_elements = n as u32;

        let mask_gpu = self.client.create(f32::as_bytes(mask));
        let decision_gpu = self.client.empty(n * size_of::<u32>());

        unsafe {
            compute_decision_kernel::launch_unchecked::<f32, CudaRuntime>(
                &self.client,
                CubeCount::Static(width.div_ceil(tile), height.div_ceil(tile), 1),
                CubeDim::new(tile, tile, 1),
                ArrayArg::from_raw_parts::<f32>(&mask_gpu, n, 1),
                ScalarArg::new(width),
                ScalarArg::new(height),
                ArrayArg::from_raw_parts::<u32>(&decision_gpu, n, 1),
            );
        }

        let decision_bytes = self.client.read_one(decision_gpu.clone());
        let decision: Vec<u32> = u32::from_bytes(&decision_bytes).to_vec();

        // Scan on the host; the scatter kernel only needs the offsets.
        let mut prefix_sum = vec![0u32; n];
        let total = exclusive_scan_cpu(&decision, &mut prefix_sum) as usize;
        ensure!(total <= n, "remap count {total} exceeds dense size {n}");

        if total == 0 {
            return Ok(GpuRemapResult {
                decision,
                prefix_sum,
                remap: Vec::new(),
            });
        }

        let prefix_gpu = self.client.create(u32::as_bytes(&prefix_sum));
        let remap_gpu = self.client.empty(total * size_of::<u32>());

        unsafe {
            scatter_remap_kernel::launch_unchecked::<CudaRuntime>(
                &self.client,
                CubeCount::Static(num_elements.div_ceil(256), 1, 1),
                CubeDim::new(256, 1, 1),
                ArrayArg::from_raw_parts::<u32>(&decision_gpu, n, 1),
                ArrayArg::from_raw_parts::<u32>(&prefix_gpu, n, 1),
                ScalarArg::new(num_elements),
                ArrayArg::from_raw_parts::<u32>(&remap_gpu, total, 1),
            );
        }

        let remap_bytes = self.client.read_one(remap_gpu);
        let remap: Vec<u32> = u32::from_bytes(&remap_bytes).to_vec();

        Ok(GpuRemapResult {
            decision,
            prefix_sum,
            remap,
        })
    }
}
