//! Result and callback types of a solve.

use serde::Serialize;

use super::debug::SolveDebug;
use crate::diagnostics::DiagnosticsSink;

/// How a solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveStatus {
    /// All configured outer iterations ran.
    Completed,

    /// An [`IterationObserver`] stopped the loop.
    EarlyOut,

    /// No active element: nothing was touched.
    NoActiveElements,

    /// Zero outer iterations requested: nothing was touched.
    NoIterations,
}

impl SolveStatus {
    /// Whether the unknown field may have changed.
    pub fn modified_field(&self) -> bool {
        matches!(self, SolveStatus::Completed | SolveStatus::EarlyOut)
    }
}

/// Summary of one outer iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    /// Outer iteration number (0-indexed).
    pub iteration: usize,

    /// Cost before the step.
    pub cost: f64,

    /// Shading weight used by this iteration.
    pub weight_shading: f64,

    /// Euclidean norm of the applied step.
    pub step_norm: f64,

    /// Number of residual rows.
    pub num_residuals: usize,
}

/// Outcome of a solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveReport {
    pub status: SolveStatus,
    pub iterations: Vec<IterationReport>,
    /// Cost before the first step (`None` when nothing ran).
    pub initial_cost: Option<f64>,
    /// Cost after the last step, evaluated with the last iteration's weights.
    pub final_cost: Option<f64>,
    /// Number of active elements (masked pixels of a dense grid excluded).
    pub num_elements: usize,
    pub num_patches: usize,
}

impl SolveReport {
    /// Report of a solve that did not touch the field.
    pub fn unchanged(status: SolveStatus, num_elements: usize, num_patches: usize) -> Self {
        Self {
            status,
            iterations: Vec::new(),
            initial_cost: None,
            final_cost: None,
            num_elements,
            num_patches,
        }
    }

    pub fn num_iterations(&self) -> usize {
        self.iterations.len()
    }
}

/// Decision of an [`IterationObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationControl {
    Continue,
    Stop,
}

/// Called after every complete outer iteration; may stop the solve early.
pub trait IterationObserver {
    fn on_iteration(&mut self, report: &IterationReport) -> IterationControl;
}

impl<F> IterationObserver for F
where
    F: FnMut(&IterationReport) -> IterationControl,
{
    fn on_iteration(&mut self, report: &IterationReport) -> IterationControl {
        self(report)
    }
}

/// Optional callbacks of a solve.
#[derive(Default)]
pub struct SolveHooks<'a> {
    /// Receives cost / JTF / preconditioner / JTJ snapshots every iteration.
    pub sink: Option<&'a mut dyn DiagnosticsSink>,
    pub observer: Option<&'a mut dyn IterationObserver>,
    /// Filled with per-iteration debug records.
    pub debug: Option<&'a mut SolveDebug>,
}

impl<'a> SolveHooks<'a> {
    pub fn with_sink(mut self, sink: &'a mut dyn DiagnosticsSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_observer(mut self, observer: &'a mut dyn IterationObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_debug(mut self, debug: &'a mut SolveDebug) -> Self {
        self.debug = Some(debug);
        self
    }
}
