//! Synthetic scenes for testing the solvers with known ground truth.
//!
//! Depth maps, masks, shading renders and grid meshes, plus seeded Gaussian
//! noise so tests stay reproducible.

use nalgebra::{Matrix4, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::energy::{sh_shading, MeshTopology, SfsInput};
use crate::types::{real, to_f64, CalibrationParams, ImageDims, LightingCoefficients, Real};

/// Constant depth map.
pub fn flat_depth<T: Real>(dims: ImageDims, depth: f64) -> Vec<T> {
    vec![real(depth); dims.len()]
}

/// Planar depth map `base + gx * x + gy * y`.
pub fn sloped_depth<T: Real>(dims: ImageDims, base: f64, gx: f64, gy: f64) -> Vec<T> {
    (0..dims.len())
        .map(|i| {
            let (x, y) = dims.coords(i);
            real(base + gx * x as f64 + gy * y as f64)
        })
        .collect()
}

/// Depth map of a hemisphere bulging towards the camera, centered in the
/// image, on a flat background at `background`.
///
/// `radius` is in pixels; the bulge height is `radius * height_per_pixel`.
pub fn hemisphere_depth<T: Real>(dims: ImageDims, background: f64, radius: f64, height_per_pixel: f64) -> Vec<T> {
    let cx = (dims.width as f64 - 1.0) * 0.5;
    let cy = (dims.height as f64 - 1.0) * 0.5;
    (0..dims.len())
        .map(|i| {
            let (x, y) = dims.coords(i);
            let r2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
            let bulge = (radius * radius - r2).max(0.0).sqrt() * height_per_pixel;
            real(background - bulge)
        })
        .collect()
}

/// Depth mask with every pixel valid except `holes`.
pub fn mask_with_holes<T: Real>(dims: ImageDims, holes: &[(usize, usize)]) -> Vec<T> {
    let mut mask = vec![T::one(); dims.len()];
    for &(x, y) in holes {
        if let Some(i) = dims.index(x as isize, y as isize) {
            mask[i] = T::zero();
        }
    }
    mask
}

/// Row and column edge masks with no depth discontinuities.
pub fn open_edge_masks(dims: ImageDims) -> (Vec<u8>, Vec<u8>) {
    (vec![1; dims.len()], vec![1; dims.len()])
}

/// Add zero-mean Gaussian noise to every finite value.
pub fn add_gaussian_noise<T: Real>(values: &mut [T], sigma: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let Ok(normal) = Normal::new(0.0, sigma) else {
        return;
    };
    for v in values.iter_mut().filter(|v| v.is_finite()) {
        *v += real::<T>(normal.sample(&mut rng));
    }
}

/// Render SH shading of `depth` with the same triangle normals the
/// shape-from-shading energy uses. Pixels without a right and lower
/// neighbor, or with a degenerate normal, are NaN.
pub fn render_shading<T: Real>(
    depth: &[T],
    dims: ImageDims,
    calibration: &CalibrationParams,
    lighting: &LightingCoefficients,
) -> Vec<T> {
    let coefficients = lighting.as_scalars::<T>();
    let point = |x: usize, y: usize| calibration.ray::<T>(x, y) * depth[y * dims.width + x];
    (0..dims.len())
        .map(|i| {
            let (x, y) = dims.coords(i);
            if x + 1 >= dims.width || y + 1 >= dims.height {
                return real::<T>(f64::NAN);
            }
            let p = point(x, y);
            let m = (point(x + 1, y) - p).cross(&(point(x, y + 1) - p));
            let len = m.norm();
            if len > T::zero() {
                sh_shading(&coefficients, &(m / len))
            } else {
                real::<T>(f64::NAN)
            }
        })
        .collect()
}

/// Homogeneous rotation of `angle` radians about the optical axis.
pub fn rotation_about_optical_axis<T: Real>(angle: f64) -> Matrix4<T> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), real::<T>(angle)).to_homogeneous()
}

/// Owned buffers of a shape-from-shading scene.
#[derive(Debug, Clone)]
pub struct SfsScene<T: Real> {
    pub dims: ImageDims,
    pub target_depth: Vec<T>,
    pub intensity: Vec<T>,
    pub previous_depth: Vec<T>,
    pub mask: Vec<T>,
    pub edge_row: Vec<u8>,
    pub edge_col: Vec<u8>,
}

impl<T: Real> SfsScene<T> {
    /// Static scene: previous depth equals the target, every pixel valid,
    /// zero intensity.
    pub fn from_depth(dims: ImageDims, depth: Vec<T>) -> Self {
        let (edge_row, edge_col) = open_edge_masks(dims);
        Self {
            dims,
            intensity: vec![T::zero(); dims.len()],
            previous_depth: depth.clone(),
            mask: vec![T::one(); dims.len()],
            target_depth: depth,
            edge_row,
            edge_col,
        }
    }

    /// Replace the intensity with a render of the target depth.
    pub fn with_rendered_intensity(mut self, calibration: &CalibrationParams, lighting: &LightingCoefficients) -> Self {
        self.intensity = render_shading(&self.target_depth, self.dims, calibration, lighting);
        self
    }

    pub fn with_mask(mut self, mask: Vec<T>) -> Self {
        self.mask = mask;
        self
    }

    /// Borrow the scene as solver input.
    pub fn input(&self) -> SfsInput<'_, T> {
        SfsInput::new(
            &self.target_depth,
            &self.intensity,
            &self.previous_depth,
            &self.mask,
            &self.edge_row,
            &self.edge_col,
        )
    }
}

/// Planar `width x height` grid mesh in the z = 0 plane with 4-neighbor
/// edges. Returns the rest positions (3 per vertex) and the topology.
pub fn grid_mesh<T: Real>(width: usize, height: usize, spacing: f64) -> (Vec<T>, MeshTopology) {
    let mut positions = Vec::with_capacity(width * height * 3);
    let mut edges = Vec::new();
    for y in 0..height {
        for x in 0..width {
            positions.extend([real::<T>(x as f64 * spacing), real(y as f64 * spacing), T::zero()]);
            let v = (y * width + x) as u32;
            if x + 1 < width {
                edges.push((v, v + 1));
            }
            if y + 1 < height {
                edges.push((v, v + width as u32));
            }
        }
    }
    // Grid edges only reference in-range vertices.
    let topology = MeshTopology::from_edges(width * height, &edges).unwrap_or_default();
    (positions, topology)
}

/// Constraint buffer with every vertex free (NaN).
pub fn free_constraints<T: Real>(num_vertices: usize) -> Vec<T> {
    vec![real::<T>(f64::NAN); num_vertices * 3]
}

/// Pin `vertices` to their position in `positions` shifted by `offset`.
pub fn pin_vertices<T: Real>(constraints: &mut [T], positions: &[T], vertices: &[usize], offset: [f64; 3]) {
    for &v in vertices {
        for c in 0..3 {
            constraints[3 * v + c] = positions[3 * v + c] + real::<T>(offset[c]);
        }
    }
}

/// Largest absolute difference between two buffers, ignoring NaN pairs.
pub fn max_abs_diff<T: Real>(a: &[T], b: &[T]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (to_f64(x), to_f64(y)))
        .filter(|(x, y)| !(x.is_nan() && y.is_nan()))
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sloped_depth() {
        let dims = ImageDims::new(3, 2);
        let depth = sloped_depth::<f64>(dims, 1.0, 0.5, 0.25);
        assert_eq!(depth, vec![1.0, 1.5, 2.0, 1.25, 1.75, 2.25]);
    }

    #[test]
    fn test_hemisphere_peaks_at_center() {
        let dims = ImageDims::new(9, 9);
        let depth = hemisphere_depth::<f64>(dims, 2.0, 3.0, 0.1);
        assert_relative_eq!(depth[4 * 9 + 4], 1.7, epsilon = 1e-12);
        assert_eq!(depth[0], 2.0);
    }

    #[test]
    fn test_noise_reproducible() {
        let mut a = vec![1.0f64; 32];
        let mut b = a.clone();
        a[3] = f64::NAN;
        b[3] = f64::NAN;
        add_gaussian_noise(&mut a, 0.01, 42);
        add_gaussian_noise(&mut b, 0.01, 42);
        assert_eq!(max_abs_diff(&a, &b), 0.0);
        assert!(a[3].is_nan());
        assert!(a.iter().filter(|v| v.is_finite()).any(|&v| v != 1.0));
    }

    #[test]
    fn test_render_flat_ambient() {
        let dims = ImageDims::new(4, 3);
        let calibration = CalibrationParams::new(10.0, 10.0, 1.5, 1.0);
        let depth = flat_depth::<f64>(dims, 2.0);
        let shading = render_shading(&depth, dims, &calibration, &LightingCoefficients::ambient(0.7));
        assert_relative_eq!(shading[0], 0.7, epsilon = 1e-12);
        assert!(shading[3].is_nan());
        assert!(shading[2 * 4].is_nan());
    }

    #[test]
    fn test_grid_mesh() {
        let (positions, topology) = grid_mesh::<f64>(3, 2, 0.5);
        assert_eq!(positions.len(), 18);
        assert_eq!(topology.num_vertices(), 6);
        // 2 * 2 horizontal + 3 vertical, both directions.
        assert_eq!(topology.num_directed_edges(), 14);
        assert_eq!(&positions[3..6], &[0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_rotation_about_optical_axis() {
        let r = rotation_about_optical_axis::<f64>(std::f64::consts::PI);
        assert_relative_eq!(r[(0, 0)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(r[(2, 2)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(r[(3, 3)], 1.0, epsilon = 1e-12);
    }
}
