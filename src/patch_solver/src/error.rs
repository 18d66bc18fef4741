//! Error types returned by the public solver API.

use thiserror::Error;

use crate::backend::BackendKind;
use crate::energy::ProblemKind;

/// Precondition failures detected before any parallel work starts.
///
/// Internal invariant violations (e.g. a remap table longer than the dense
/// domain) are not represented here; they panic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("buffer `{buffer}` has {actual} elements, expected {expected}")]
    DimensionMismatch {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("solver domain is empty ({width}x{height})")]
    EmptyDomain { width: usize, height: usize },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("no {backend:?} backend registered for {problem:?}")]
    BackendUnavailable {
        problem: ProblemKind,
        backend: BackendKind,
    },

    #[error("mesh topology references vertex {vertex}, but the mesh has {num_vertices} vertices")]
    InvalidTopology { vertex: usize, num_vertices: usize },
}

pub type Result<T, E = SolverError> = std::result::Result<T, E>;

/// Check that a caller buffer has the expected number of elements.
pub(crate) fn check_len<T>(buffer: &'static str, data: &[T], expected: usize) -> Result<()> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(SolverError::DimensionMismatch {
            buffer,
            expected,
            actual: data.len(),
        })
    }
}

/// Check that a weight is finite and non-negative.
pub(crate) fn check_weight(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SolverError::InvalidParameter {
            name,
            reason: format!("expected a finite, non-negative weight, got {value}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_len() {
        assert!(check_len("depth", &[0.0f32; 4], 4).is_ok());
        let err = check_len("depth", &[0.0f32; 3], 4).unwrap_err();
        assert_eq!(
            err,
            SolverError::DimensionMismatch {
                buffer: "depth",
                expected: 4,
                actual: 3
            }
        );
        assert_eq!(
            err.to_string(),
            "buffer `depth` has 3 elements, expected 4"
        );
    }

    #[test]
    fn test_check_weight() {
        assert!(check_weight("weight_fitting", 0.0).is_ok());
        assert!(check_weight("weight_fitting", 2.5).is_ok());
        assert!(check_weight("weight_fitting", -1.0).is_err());
        assert!(check_weight("weight_fitting", f64::NAN).is_err());
        assert!(check_weight("weight_fitting", f64::INFINITY).is_err());
    }
}
