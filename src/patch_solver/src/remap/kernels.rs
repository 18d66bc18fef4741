//! CubeCL kernels for the remap stage.
//!
//! - Decision kernel: one thread per pixel, launched in `patch_size x patch_size` cubes
//! - Scatter kernel: writes each active dense index to its compacted slot
//!
//! The exclusive prefix sum between the two runs on the host.

use cubecl::prelude::*;

/// Write 1 for valid mask values (finite and strictly positive), 0 otherwise.
#[cube(launch_unchecked)]
pub fn compute_decision_kernel<F: Float>(
    mask: &Array<F>,           // Dense mask, row-major
    width: u32,                // Grid width
    height: u32,               // Grid height
    decision: &mut Array<u32>, // Output decision (1 = active)
) {
    let x = ABSOLUTE_POS_X;
    let y = ABSOLUTE_POS_Y;

    if x < width && y < height {
        let idx = y * width + x;
        let m = mask[idx];

        // NaN fails both comparisons, +inf fails the upper bound.
        if m > F::new(0.0) && m <= F::new(f32::MAX) {
            decision[idx] = 1u32;
        } else {
            decision[idx] = 0u32;
        }
    }
}

/// `remap[prefix_sum[i]] = i` for every active element `i`.
#[cube(launch_unchecked)]
pub fn scatter_remap_kernel(
    decision: &Array<u32>,   // Decision array
    prefix_sum: &Array<u32>, // Exclusive prefix sum of decision
    num_elements: u32,       // Dense element count
    remap: &mut Array<u32>,  // Output remap table
) {
    let idx = ABSOLUTE_POS;

    if idx < num_elements {
        if decision[idx] == 1u32 {
            remap[prefix_sum[idx]] = idx;
        }
    }
}
