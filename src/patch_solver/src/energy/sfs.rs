//! Shape-from-shading depth refinement energy.
//!
//! One depth unknown per pixel. Terms:
//! - fitting: `sqrt(w_fit) * (d_i - target_i)` for valid target depths
//! - shading: `sqrt(w_shading) * (albedo_i * SH(n_i) - I_i)`, `n_i` being the
//!   normal of the triangle (pixel, right neighbor, lower neighbor)
//! - regularizer: 3D Laplacian of the back-projected points
//!
//! The previous-frame depth is warped by the delta transform once per solve
//! and only gates which shading residuals exist.

use nalgebra::{Matrix4, Vector3, Vector4};
use tracing::trace;

use super::grid::GridDomain;
use super::lighting::{sh_shading, sh_shading_gradient, SH_COEFFICIENTS};
use super::{Energy, EnergyWeights, ProblemKind, ResidualRow};
use crate::backend::NamedParam;
use crate::error::{check_len, Result};
use crate::patch::PatchPartition;
use crate::solver::SolverParameters;
use crate::types::{real, to_f64, CalibrationParams, ImageDims, LightingCoefficients, Real};

/// `|m|` below this makes a shading normal degenerate.
const DEGENERATE_NORMAL: f64 = 1e-20;

/// Caller buffers of a shape-from-shading solve. All slices are dense and
/// row-major with `width * height` elements.
#[derive(Debug, Clone)]
pub struct SfsInput<'a, T: Real> {
    pub target_depth: &'a [T],
    pub target_intensity: &'a [T],
    pub previous_depth: &'a [T],
    pub depth_mask: &'a [T],
    /// Non-zero when pixel `i` may couple to its right neighbor.
    pub edge_mask_row: &'a [u8],
    /// Non-zero when pixel `i` may couple to its lower neighbor.
    pub edge_mask_col: &'a [u8],
    /// Per-pixel albedo, 1 when absent.
    pub albedo: Option<&'a [T]>,
    pub lighting: LightingCoefficients,
    /// Rigid motion from the previous frame to the current one.
    pub delta_transform: Matrix4<T>,
}

impl<'a, T: Real> SfsInput<'a, T> {
    /// Inputs with no albedo, zero lighting and an identity delta transform.
    pub fn new(
        target_depth: &'a [T],
        target_intensity: &'a [T],
        previous_depth: &'a [T],
        depth_mask: &'a [T],
        edge_mask_row: &'a [u8],
        edge_mask_col: &'a [u8],
    ) -> Self {
        Self {
            target_depth,
            target_intensity,
            previous_depth,
            depth_mask,
            edge_mask_row,
            edge_mask_col,
            albedo: None,
            lighting: LightingCoefficients::default(),
            delta_transform: Matrix4::identity(),
        }
    }

    pub fn with_lighting(mut self, lighting: LightingCoefficients) -> Self {
        self.lighting = lighting;
        self
    }

    pub fn with_albedo(mut self, albedo: &'a [T]) -> Self {
        self.albedo = Some(albedo);
        self
    }

    pub fn with_delta_transform(mut self, transform: Matrix4<T>) -> Self {
        self.delta_transform = transform;
        self
    }

    /// Check every buffer against the grid size.
    pub fn validate(&self, dims: ImageDims) -> Result<()> {
        let n = dims.len();
        check_len("target_depth", self.target_depth, n)?;
        check_len("target_intensity", self.target_intensity, n)?;
        check_len("previous_depth", self.previous_depth, n)?;
        check_len("depth_mask", self.depth_mask, n)?;
        check_len("edge_mask_row", self.edge_mask_row, n)?;
        check_len("edge_mask_col", self.edge_mask_col, n)?;
        if let Some(albedo) = self.albedo {
            check_len("albedo", albedo, n)?;
        }
        Ok(())
    }

    /// Delta transform as 16 row-major `f64` values.
    pub fn delta_transform_row_major(&self) -> [f64; 16] {
        let mut out = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                out[r * 4 + c] = to_f64(self.delta_transform[(r, c)]);
            }
        }
        out
    }
}

#[inline]
fn is_valid_depth<T: Real>(d: T) -> bool {
    d.is_finite() && d > T::zero()
}

/// Warp a depth map by a rigid transform.
///
/// Every valid pixel is back-projected, transformed and re-projected to the
/// nearest pixel; collisions keep the closest depth. Pixels nothing lands on
/// are 0 (invalid).
pub fn warp_depth<T: Real>(
    depth: &[T],
    dims: ImageDims,
    calibration: &CalibrationParams,
    transform: &Matrix4<T>,
) -> Vec<T> {
    if *transform == Matrix4::identity() {
        return depth
            .iter()
            .map(|&d| if is_valid_depth(d) { d } else { T::zero() })
            .collect();
    }

    let mut warped = vec![T::zero(); dims.len()];
    for (i, &d) in depth.iter().enumerate() {
        if !is_valid_depth(d) {
            continue;
        }
        let (x, y) = dims.coords(i);
        let p = calibration.ray::<T>(x, y) * d;
        let q = transform * Vector4::new(p.x, p.y, p.z, T::one());
        let q = Vector3::new(q.x, q.y, q.z);
        if q.z <= T::zero() {
            continue;
        }
        let (u, v) = calibration.project(&q);
        let (u, v) = (to_f64(u).round(), to_f64(v).round());
        if !u.is_finite() || !v.is_finite() {
            continue;
        }
        if let Some(j) = dims.index(u as isize, v as isize) {
            if warped[j] == T::zero() || q.z < warped[j] {
                warped[j] = q.z;
            }
        }
    }
    warped
}

/// Shape-from-shading energy over a borrowed depth map.
pub struct SfsEnergy<'a, T: Real> {
    domain: GridDomain,
    calibration: CalibrationParams,
    input: &'a SfsInput<'a, T>,
    rays: Vec<Vector3<T>>,
    warped_previous: Vec<T>,
    lighting: [T; SH_COEFFICIENTS],
    depth: &'a mut [T],
}

impl<'a, T: Real> SfsEnergy<'a, T> {
    /// `depth` is the dense unknown field, updated in place by `apply_step`.
    pub fn new(
        domain: GridDomain,
        calibration: CalibrationParams,
        input: &'a SfsInput<'a, T>,
        depth: &'a mut [T],
    ) -> Self {
        let dims = domain.dims();
        let rays = (0..dims.len())
            .map(|i| {
                let (x, y) = dims.coords(i);
                calibration.ray::<T>(x, y)
            })
            .collect();
        let warped_previous = warp_depth(
            input.previous_depth,
            dims,
            &calibration,
            &input.delta_transform,
        );
        Self {
            domain,
            calibration,
            input,
            rays,
            warped_previous,
            lighting: input.lighting.as_scalars(),
            depth,
        }
    }

    pub fn domain(&self) -> &GridDomain {
        &self.domain
    }

    /// Previous-frame depth after the delta transform.
    pub fn warped_previous_depth(&self) -> &[T] {
        &self.warped_previous
    }

    #[inline]
    fn point(&self, dense: usize) -> Vector3<T> {
        self.rays[dense] * self.depth[dense]
    }

    fn push_regularizer(&self, e: usize, scale_full: T, scale_boundary: T, out: &mut Vec<ResidualRow<T>>) {
        let dense = self.domain.dense_of(e);
        let (x, y) = self.domain.coords_of(e);
        let (x, y) = (x as isize, y as isize);
        let neighbors = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            .map(|(nx, ny)| self.domain.element_at(nx, ny));
        let count = neighbors.iter().flatten().count();
        if count == 0 {
            return;
        }

        let s = if count == 4 { scale_full } else { scale_boundary };
        if s <= T::zero() {
            return;
        }

        let inv = T::one() / real::<T>(count as f64);
        let mean = neighbors
            .iter()
            .flatten()
            .fold(Vector3::zeros(), |acc, &n| acc + self.point(self.domain.dense_of(n)))
            * inv;
        let laplacian = self.point(dense) - mean;

        for c in 0..3 {
            let mut row = ResidualRow::new(e, s * laplacian[c]);
            row.push(e, s * self.rays[dense][c]);
            for &n in neighbors.iter().flatten() {
                let dn = self.domain.dense_of(n);
                row.push(n, -s * inv * self.rays[dn][c]);
            }
            out.push(row);
        }
    }

    fn push_shading(&self, e: usize, scale: T, out: &mut Vec<ResidualRow<T>>) {
        let dense = self.domain.dense_of(e);
        let (x, y) = self.domain.coords_of(e);
        let (x, y) = (x as isize, y as isize);

        let (Some(er), Some(eb)) = (self.domain.element_at(x + 1, y), self.domain.element_at(x, y + 1)) else {
            return;
        };
        if self.input.edge_mask_row[dense] == 0 || self.input.edge_mask_col[dense] == 0 {
            return;
        }
        let (dr, db) = (self.domain.dense_of(er), self.domain.dense_of(eb));
        if ![dense, dr, db]
            .iter()
            .all(|&k| is_valid_depth(self.warped_previous[k]))
        {
            return;
        }
        let intensity = self.input.target_intensity[dense];
        if !intensity.is_finite() {
            return;
        }

        let p = self.point(dense);
        let a = self.point(dr) - p;
        let b = self.point(db) - p;
        let m = a.cross(&b);
        let len = m.norm();
        if !(len > real::<T>(DEGENERATE_NORMAL)) {
            trace!(element = e, "degenerate shading normal, skipped");
            return;
        }
        let n = m / len;

        let albedo = self.input.albedo.map_or(T::one(), |a| a[dense]);
        let g = sh_shading_gradient(&self.lighting, &n);
        // d(m/|m|)/dm = (I - n nᵀ) / |m|, applied to the shading gradient.
        let gt = (g - n * n.dot(&g)) / len;

        let ray_i = self.rays[dense];
        let dm_i = ray_i.cross(&(a - b));
        let dm_r = self.rays[dr].cross(&b);
        let dm_b = a.cross(&self.rays[db]);

        let k = scale * albedo;
        let mut row = ResidualRow::new(e, scale * (albedo * sh_shading(&self.lighting, &n) - intensity));
        row.push(e, k * gt.dot(&dm_i))
            .push(er, k * gt.dot(&dm_r))
            .push(eb, k * gt.dot(&dm_b));
        out.push(row);
    }
}

impl<T: Real> Energy<T> for SfsEnergy<'_, T> {
    fn kind(&self) -> ProblemKind {
        ProblemKind::ShapeFromShading
    }

    fn num_elements(&self) -> usize {
        self.domain.num_elements()
    }

    fn num_active(&self) -> usize {
        self.domain.num_active()
    }

    fn unknowns_per_element(&self) -> usize {
        1
    }

    fn partition(&self) -> &PatchPartition {
        self.domain.partition()
    }

    fn element_residuals(&self, e: usize, weights: &EnergyWeights<T>, out: &mut Vec<ResidualRow<T>>) {
        if !self.domain.is_active(e) {
            return;
        }
        let w = weights.sqrt();
        let dense = self.domain.dense_of(e);

        if w.fitting > T::zero() {
            let target = self.input.target_depth[dense];
            if is_valid_depth(target) {
                let mut row = ResidualRow::new(e, w.fitting * (self.depth[dense] - target));
                row.push(e, w.fitting);
                out.push(row);
            }
        }

        if w.shading > T::zero() {
            self.push_shading(e, w.shading, out);
        }

        self.push_regularizer(e, w.regularizer, w.boundary, out);
    }

    fn apply_step(&mut self, delta: &[T]) {
        for e in 0..self.domain.num_elements() {
            if self.domain.is_active(e) {
                let dense = self.domain.dense_of(e);
                self.depth[dense] += delta[e];
            }
        }
    }

    fn snapshot_dims(&self) -> ImageDims {
        self.domain.dims()
    }

    fn dense_index(&self, element: usize) -> usize {
        self.domain.dense_of(element)
    }

    fn named_parameters(&self, params: &SolverParameters) -> Vec<NamedParam> {
        params.named_values(
            &self.calibration,
            &self.input.delta_transform_row_major(),
            &self.input.lighting,
        )
    }
}
