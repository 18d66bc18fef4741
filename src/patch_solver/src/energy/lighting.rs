//! Second-order spherical harmonics shading.
//!
//! Basis order: `1, y, z, x, xy, yz, -x²-y²+2z², zx, x²-y²` (normalization
//! constants are folded into the coefficients).

use nalgebra::Vector3;

use crate::types::Real;

pub const SH_COEFFICIENTS: usize = 9;

/// Evaluate the nine basis functions at unit normal `n`.
pub fn sh_basis<T: Real>(n: &Vector3<T>) -> [T; SH_COEFFICIENTS] {
    let (x, y, z) = (n.x, n.y, n.z);
    let two = T::one() + T::one();
    [
        T::one(),
        y,
        z,
        x,
        x * y,
        y * z,
        -x * x - y * y + two * z * z,
        z * x,
        x * x - y * y,
    ]
}

/// Shading `Σ L_k B_k(n)`.
pub fn sh_shading<T: Real>(coefficients: &[T; SH_COEFFICIENTS], n: &Vector3<T>) -> T {
    sh_basis(n)
        .iter()
        .zip(coefficients)
        .fold(T::zero(), |acc, (&b, &l)| acc + b * l)
}

/// Gradient of [`sh_shading`] with respect to the normal.
pub fn sh_shading_gradient<T: Real>(l: &[T; SH_COEFFICIENTS], n: &Vector3<T>) -> Vector3<T> {
    let (x, y, z) = (n.x, n.y, n.z);
    let two = T::one() + T::one();
    let four = two + two;
    Vector3::new(
        l[3] + l[4] * y - two * l[6] * x + l[7] * z + two * l[8] * x,
        l[1] + l[4] * x + l[5] * z - two * l[6] * y - two * l[8] * y,
        l[2] + l[5] * y + four * l[6] * z + l[7] * x,
    )
}
