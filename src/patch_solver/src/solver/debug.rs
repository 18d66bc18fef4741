//! Debug records of a solve, serializable to JSON for offline comparison
//! between backends.

use serde::Serialize;

use crate::timing::{IterationTiming, SolveTiming};

/// Debug information captured at each outer iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationDebug {
    /// Iteration number (0-indexed).
    pub iteration: usize,

    /// Shading weight of this iteration.
    pub weight_shading: f64,

    /// Cost before the step.
    pub cost: f64,

    /// Norm of JTF (gradient of the half cost).
    pub jtf_norm: f64,

    /// Norm of the applied step.
    pub step_norm: f64,

    /// Largest absolute step component.
    pub step_max: f64,

    /// Residual rows evaluated.
    pub num_residuals: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<IterationTiming>,
}

impl IterationDebug {
    pub fn new(iteration: usize) -> Self {
        Self {
            iteration,
            weight_shading: 0.0,
            cost: 0.0,
            jtf_norm: 0.0,
            step_norm: 0.0,
            step_max: 0.0,
            num_residuals: 0,
            timing: None,
        }
    }

    /// Set step statistics from the raw step.
    pub fn set_step(&mut self, step: &[f64]) {
        self.step_norm = step.iter().map(|s| s * s).sum::<f64>().sqrt();
        self.step_max = step.iter().fold(0.0, |m, s| m.max(s.abs()));
    }

    /// Compact single-line form for logs.
    pub fn to_log_line(&self) -> String {
        format!(
            "iter={} w_shading={:.4} cost={:.6e} |jtf|={:.4e} |step|={:.4e} max_step={:.4e} rows={}",
            self.iteration,
            self.weight_shading,
            self.cost,
            self.jtf_norm,
            self.step_norm,
            self.step_max,
            self.num_residuals,
        )
    }
}

/// Debug information of a complete solve.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolveDebug {
    pub problem: String,
    pub backend: String,
    pub num_elements: usize,
    pub num_patches: usize,
    pub num_boundary: usize,
    pub iterations: Vec<IterationDebug>,
    pub status: String,
    pub final_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<SolveTiming>,
}

impl SolveDebug {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}
