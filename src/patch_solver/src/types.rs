//! Shared scalar, grid and camera types.

use nalgebra::{Matrix4, RealField, Vector3};
use serde::{Deserialize, Serialize};

/// Scalar type the solver is generic over (`f32` or `f64`).
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// Convert an `f64` constant into the solver scalar type.
#[inline]
pub(crate) fn real<T: Real>(value: f64) -> T {
    nalgebra::convert(value)
}

/// Convert a solver scalar into `f64` (reports, diagnostics).
#[inline]
pub(crate) fn to_f64<T: Real>(value: T) -> f64 {
    nalgebra::try_convert(value).unwrap_or(f64::NAN)
}

/// Dense grid dimensions. Elements are stored row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDims {
    pub width: usize,
    pub height: usize,
}

impl ImageDims {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of dense elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dense index of pixel `(x, y)`, or `None` outside the grid.
    #[inline]
    pub fn index(&self, x: isize, y: isize) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            None
        } else {
            Some(y as usize * self.width + x as usize)
        }
    }

    /// Pixel coordinates of a dense index.
    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }
}

/// Pinhole camera intrinsics.
///
/// `fy` is stored with the sign used for back-projection: depth sensors with a
/// downward image y axis pass a negative focal length here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    pub fx: f64,
    pub fy: f64,
    pub ux: f64,
    pub uy: f64,
}

impl CalibrationParams {
    pub fn new(fx: f64, fy: f64, ux: f64, uy: f64) -> Self {
        Self { fx, fy, ux, uy }
    }

    /// Build from a 4x4 intrinsics matrix with the principal point in the
    /// last column. The y focal length is negated.
    pub fn from_intrinsics(intrinsics: &Matrix4<f64>) -> Self {
        Self {
            fx: intrinsics[(0, 0)],
            fy: -intrinsics[(1, 1)],
            ux: intrinsics[(0, 3)],
            uy: intrinsics[(1, 3)],
        }
    }

    /// Viewing ray through pixel `(x, y)` with unit z, so that the camera
    /// space point at depth `d` is `d * ray`.
    #[inline]
    pub fn ray<T: Real>(&self, x: usize, y: usize) -> Vector3<T> {
        Vector3::new(
            real::<T>((x as f64 - self.ux) / self.fx),
            real::<T>((y as f64 - self.uy) / self.fy),
            T::one(),
        )
    }

    /// Project a camera space point to continuous pixel coordinates.
    #[inline]
    pub fn project<T: Real>(&self, point: &Vector3<T>) -> (T, T) {
        let u = real::<T>(self.fx) * point.x / point.z + real::<T>(self.ux);
        let v = real::<T>(self.fy) * point.y / point.z + real::<T>(self.uy);
        (u, v)
    }
}

impl Default for CalibrationParams {
    fn default() -> Self {
        // Kinect-style 640x480 intrinsics.
        Self::new(525.0, -525.0, 319.5, 239.5)
    }
}

/// Second-order spherical harmonics lighting coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LightingCoefficients(pub [f64; 9]);

impl LightingCoefficients {
    /// Pure ambient lighting of the given intensity.
    pub fn ambient(intensity: f64) -> Self {
        let mut coefficients = [0.0; 9];
        coefficients[0] = intensity;
        Self(coefficients)
    }

    pub fn as_scalars<T: Real>(&self) -> [T; 9] {
        self.0.map(real::<T>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dims_index_and_coords() {
        let dims = ImageDims::new(5, 3);
        assert_eq!(dims.len(), 15);
        assert_eq!(dims.index(4, 2), Some(14));
        assert_eq!(dims.index(5, 0), None);
        assert_eq!(dims.index(-1, 0), None);
        assert_eq!(dims.coords(7), (2, 1));
    }

    #[test]
    fn test_ray_projects_back_to_pixel() {
        let calib = CalibrationParams::default();
        let ray = calib.ray::<f64>(100, 50);
        let point = ray * 2.5;
        let (u, v) = calib.project(&point);
        assert_relative_eq!(u, 100.0, epsilon = 1e-9);
        assert_relative_eq!(v, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_from_intrinsics_negates_fy() {
        let mut m = Matrix4::identity();
        m[(0, 0)] = 500.0;
        m[(1, 1)] = 510.0;
        m[(0, 3)] = 320.0;
        m[(1, 3)] = 240.0;
        let calib = CalibrationParams::from_intrinsics(&m);
        assert_eq!(calib, CalibrationParams::new(500.0, -510.0, 320.0, 240.0));
    }
}
