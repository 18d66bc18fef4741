//! CPU reference implementation of the decision / scan / scatter pipeline.

use rayon::prelude::*;

use crate::types::Real;

/// An element is valid when its mask value is finite and strictly positive.
#[inline]
pub fn is_valid_mask_value<T: Real>(value: T) -> bool {
    value.is_finite() && value > T::zero()
}

/// Write 1 for every valid mask element and 0 otherwise.
pub fn compute_decision_cpu<T: Real>(mask: &[T], decision: &mut [u32]) {
    assert_eq!(mask.len(), decision.len(), "decision buffer size mismatch");
    decision
        .par_iter_mut()
        .zip(mask.par_iter())
        .for_each(|(d, &m)| *d = u32::from(is_valid_mask_value(m)));
}

/// Exclusive prefix sum of `input` into `output`.
///
/// # Returns
/// The total, i.e. `output[last] + input[last]` (0 for an empty input).
pub fn exclusive_scan_cpu(input: &[u32], output: &mut [u32]) -> u32 {
    assert_eq!(input.len(), output.len(), "scan buffer size mismatch");
    let mut sum = 0u32;
    for (o, &v) in output.iter_mut().zip(input) {
        *o = sum;
        sum += v;
    }
    sum
}

/// Scatter every active dense index to its compacted slot:
/// `remap[prefix_sum[i]] = i` wherever `decision[i] == 1`.
pub fn scatter_remap_cpu(decision: &[u32], prefix_sum: &[u32], remap: &mut [u32]) {
    for (i, (&d, &p)) in decision.iter().zip(prefix_sum).enumerate() {
        if d == 1 {
            remap[p as usize] = i as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_validity() {
        assert!(is_valid_mask_value(1.0f32));
        assert!(is_valid_mask_value(1e-6f64));
        assert!(!is_valid_mask_value(0.0f32));
        assert!(!is_valid_mask_value(-2.0f32));
        assert!(!is_valid_mask_value(f32::NAN));
        assert!(!is_valid_mask_value(f32::INFINITY));
        assert!(!is_valid_mask_value(f32::NEG_INFINITY));
    }

    #[test]
    fn test_exclusive_scan() {
        let input = [1, 0, 1, 1, 0, 1];
        let mut output = [0u32; 6];
        let total = exclusive_scan_cpu(&input, &mut output);
        assert_eq!(output, [0, 1, 1, 2, 3, 3]);
        assert_eq!(total, 4);
        assert_eq!(total, output[5] + input[5]);
    }

    #[test]
    fn test_exclusive_scan_empty() {
        assert_eq!(exclusive_scan_cpu(&[], &mut []), 0);
    }

    #[test]
    fn test_scatter_remap() {
        let decision = [0, 1, 1, 0, 1];
        let mut prefix = [0u32; 5];
        let total = exclusive_scan_cpu(&decision, &mut prefix) as usize;
        let mut remap = vec![u32::MAX; total];
        scatter_remap_cpu(&decision, &prefix, &mut remap);
        assert_eq!(remap, vec![1, 2, 4]);
    }
}
