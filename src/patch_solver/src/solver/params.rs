//! Iteration counts and energy weights.

use serde::{Deserialize, Serialize};

use crate::backend::{NamedParam, ParamValue};
use crate::energy::EnergyWeights;
use crate::error::{check_weight, Result};
use crate::types::{real, CalibrationParams, LightingCoefficients, Real};

/// Parameters of one solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParameters {
    /// Outer Gauss-Newton iterations.
    pub non_linear_iterations: usize,

    /// Block PCG passes per outer iteration.
    pub linear_iterations: usize,

    /// PCG iterations inside each patch per pass.
    pub patch_iterations: usize,

    pub weight_fitting: f64,

    /// Shading weight of the first outer iteration.
    pub weight_shading_start: f64,

    /// Added to the shading weight after every outer iteration.
    pub weight_shading_increment: f64,

    pub weight_regularizer: f64,

    /// Pull towards the rest shape (mesh deformation only).
    pub weight_prior: f64,

    /// Regularizer weight of pixels with an incomplete neighborhood.
    pub weight_boundary: f64,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            non_linear_iterations: 5,
            linear_iterations: 4,
            patch_iterations: 16,
            weight_fitting: 1.0,
            weight_shading_start: 1.0,
            weight_shading_increment: 0.5,
            weight_regularizer: 1.0,
            weight_prior: 0.0,
            weight_boundary: 1.0,
        }
    }
}

impl SolverParameters {
    /// Shading weight of outer iteration `k`.
    pub fn weight_shading(&self, k: usize) -> f64 {
        self.weight_shading_start + self.weight_shading_increment * k as f64
    }

    /// Effective weights of outer iteration `k` in the solver precision.
    pub fn weights_at<T: Real>(&self, k: usize) -> EnergyWeights<T> {
        EnergyWeights {
            fitting: real(self.weight_fitting),
            shading: real(self.weight_shading(k).max(0.0)),
            regularizer: real(self.weight_regularizer),
            prior: real(self.weight_prior),
            boundary: real(self.weight_boundary),
        }
    }

    /// Reject non-finite or negative weights.
    ///
    /// A negative shading increment is allowed; the schedule is clamped at 0.
    pub fn validate(&self) -> Result<()> {
        check_weight("weight_fitting", self.weight_fitting)?;
        check_weight("weight_shading_start", self.weight_shading_start)?;
        check_weight("weight_regularizer", self.weight_regularizer)?;
        check_weight("weight_prior", self.weight_prior)?;
        check_weight("weight_boundary", self.weight_boundary)?;
        if !self.weight_shading_increment.is_finite() {
            return Err(crate::SolverError::InvalidParameter {
                name: "weight_shading_increment",
                reason: format!("expected a finite value, got {}", self.weight_shading_increment),
            });
        }
        Ok(())
    }

    /// Iteration counts as named values (non-linear, linear, patch).
    pub fn iteration_values(&self) -> [NamedParam; 3] {
        [
            NamedParam::new("nNonLinearIterations", ParamValue::Uint(self.non_linear_iterations as u32)),
            NamedParam::new("nLinIterations", ParamValue::Uint(self.linear_iterations as u32)),
            NamedParam::new("nPatchIterations", ParamValue::Uint(self.patch_iterations as u32)),
        ]
    }

    /// Full shape-from-shading parameter list in plan order:
    /// weights (fitting, regularizer, prior, shading, shading start, shading
    /// increment, boundary), fx, fy, ux, uy, 16 row-major delta transform
    /// entries, 9 lighting coefficients, then the iteration counts.
    ///
    /// `weightShading` is the weight of the first outer iteration.
    pub fn named_values(
        &self,
        calibration: &CalibrationParams,
        delta_transform: &[f64; 16],
        lighting: &LightingCoefficients,
    ) -> Vec<NamedParam> {
        let float = |name: &str, value: f64| NamedParam::new(name, ParamValue::Float(value));

        let mut values = vec![
            float("weightFitting", self.weight_fitting),
            float("weightRegularizer", self.weight_regularizer),
            float("weightPrior", self.weight_prior),
            float("weightShading", self.weight_shading(0)),
            float("weightShadingStart", self.weight_shading_start),
            float("weightShadingIncrement", self.weight_shading_increment),
            float("weightBoundary", self.weight_boundary),
            float("fx", calibration.fx),
            float("fy", calibration.fy),
            float("ux", calibration.ux),
            float("uy", calibration.uy),
        ];
        values.extend(
            delta_transform
                .iter()
                .enumerate()
                .map(|(i, &v)| float(&format!("deltaTransform[{i}]"), v)),
        );
        values.extend(
            lighting
                .0
                .iter()
                .enumerate()
                .map(|(i, &v)| float(&format!("lightingCoefficients[{i}]"), v)),
        );
        values.extend(self.iteration_values());
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shading_schedule() {
        let params = SolverParameters {
            weight_shading_start: 2.0,
            weight_shading_increment: 0.25,
            ..Default::default()
        };
        for k in 0..6 {
            assert_relative_eq!(params.weight_shading(k), 2.0 + 0.25 * k as f64);
        }
        let w: EnergyWeights<f32> = params.weights_at(4);
        assert_relative_eq!(w.shading, 3.0f32);
    }

    #[test]
    fn test_negative_schedule_is_clamped() {
        let params = SolverParameters {
            weight_shading_start: 1.0,
            weight_shading_increment: -1.0,
            ..Default::default()
        };
        assert!(params.validate().is_ok());
        assert_eq!(params.weights_at::<f64>(3).shading, 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let params = SolverParameters {
            weight_regularizer: f64::NAN,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = SolverParameters {
            weight_fitting: -1.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_named_values_order() {
        let params = SolverParameters::default();
        let calib = CalibrationParams::new(1.0, -2.0, 3.0, 4.0);
        let mut transform = [0.0; 16];
        transform[3] = 7.0;
        let values = params.named_values(&calib, &transform, &LightingCoefficients::ambient(0.9));

        assert_eq!(values.len(), 7 + 4 + 16 + 9 + 3);
        assert_eq!(values[0].name, "weightFitting");
        assert_eq!(values[6].name, "weightBoundary");
        assert_eq!(values[8], NamedParam::new("fy", ParamValue::Float(-2.0)));
        assert_eq!(values[11 + 3], NamedParam::new("deltaTransform[3]", ParamValue::Float(7.0)));
        assert_eq!(values[27], NamedParam::new("lightingCoefficients[0]", ParamValue::Float(0.9)));
        assert_eq!(values[36].name, "nNonLinearIterations");
        assert_eq!(values[38], NamedParam::new("nPatchIterations", ParamValue::Uint(16)));
    }

    #[test]
    fn test_serde_defaults() {
        let params: SolverParameters = serde_json::from_str(r#"{"non_linear_iterations": 2}"#).unwrap();
        assert_eq!(params.non_linear_iterations, 2);
        assert_eq!(params.patch_iterations, SolverParameters::default().patch_iterations);
    }
}
