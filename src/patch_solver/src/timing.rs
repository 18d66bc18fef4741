//! Per-phase timing of solves.
//!
//! Real timing is collected with the `profiling` feature. Without it every
//! timer and collector method compiles to a no-op.

use serde::{Deserialize, Serialize};
use std::time::Duration;
#[cfg(feature = "profiling")]
use std::time::Instant;

/// Phase names accepted by [`TimingCollector::record_phase`].
pub mod phase {
    pub const REMAP: &str = "remap";
    pub const EVALUATE: &str = "evaluate";
    pub const LINEAR_SOLVE: &str = "linear_solve";
    pub const APPLY: &str = "apply";
}

/// Timing breakdown of one solve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveTiming {
    pub total_ms: f64,
    /// Mask decision, prefix sum and remap table.
    pub remap_ms: f64,
    /// Residual / Jacobian evaluation and normal equation assembly.
    pub evaluate_ms: f64,
    pub linear_solve_ms: f64,
    pub apply_ms: f64,
    pub iterations: Vec<IterationTiming>,
}

/// Timing of one outer iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationTiming {
    pub iteration: usize,
    pub total_ms: f64,
    pub evaluate_ms: f64,
    pub linear_solve_ms: f64,
    pub apply_ms: f64,
}

#[cfg(feature = "profiling")]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

#[cfg(feature = "profiling")]
impl Timer {
    #[inline]
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// No-op timer.
#[cfg(not(feature = "profiling"))]
pub struct Timer;

#[cfg(not(feature = "profiling"))]
impl Timer {
    #[inline(always)]
    pub fn new(_name: &'static str) -> Self {
        Self
    }

    #[inline(always)]
    pub fn elapsed_ms(&self) -> f64 {
        0.0
    }

    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        Duration::ZERO
    }

    #[inline(always)]
    pub fn name(&self) -> &'static str {
        ""
    }
}

#[cfg(feature = "profiling")]
#[derive(Debug, Default)]
pub struct TimingCollector {
    solve_start: Option<Instant>,
    iteration_start: Option<Instant>,
    current_iteration: usize,
    current: IterationTiming,
    timing: SolveTiming,
}

#[cfg(feature = "profiling")]
impl TimingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_solve(&mut self) {
        self.solve_start = Some(Instant::now());
        self.current_iteration = 0;
        self.timing = SolveTiming::default();
    }

    pub fn start_iteration(&mut self) {
        self.iteration_start = Some(Instant::now());
        self.current = IterationTiming {
            iteration: self.current_iteration,
            ..Default::default()
        };
    }

    pub fn record_phase(&mut self, name: &str, duration_ms: f64) {
        match name {
            phase::REMAP => self.timing.remap_ms += duration_ms,
            phase::EVALUATE => {
                self.current.evaluate_ms += duration_ms;
                self.timing.evaluate_ms += duration_ms;
            }
            phase::LINEAR_SOLVE => {
                self.current.linear_solve_ms += duration_ms;
                self.timing.linear_solve_ms += duration_ms;
            }
            phase::APPLY => {
                self.current.apply_ms += duration_ms;
                self.timing.apply_ms += duration_ms;
            }
            _ => {}
        }
    }

    /// Close the current iteration and return its timing.
    pub fn end_iteration(&mut self) -> Option<IterationTiming> {
        self.current.total_ms = self
            .iteration_start
            .take()
            .map(|s| s.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        let done = std::mem::take(&mut self.current);
        self.timing.iterations.push(done.clone());
        self.current_iteration += 1;
        Some(done)
    }

    pub fn finish(&mut self) -> Option<SolveTiming> {
        self.timing.total_ms = self
            .solve_start
            .take()
            .map(|s| s.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        Some(std::mem::take(&mut self.timing))
    }
}

/// No-op collector.
#[cfg(not(feature = "profiling"))]
#[derive(Debug, Default)]
pub struct TimingCollector;

#[cfg(not(feature = "profiling"))]
impl TimingCollector {
    #[inline(always)]
    pub fn new() -> Self {
        Self
    }

    #[inline(always)]
    pub fn start_solve(&mut self) {}

    #[inline(always)]
    pub fn start_iteration(&mut self) {}

    #[inline(always)]
    pub fn record_phase(&mut self, _name: &str, _duration_ms: f64) {}

    #[inline(always)]
    pub fn end_iteration(&mut self) -> Option<IterationTiming> {
        None
    }

    #[inline(always)]
    pub fn finish(&mut self) -> Option<SolveTiming> {
        None
    }
}

/// Time a block of code as one phase.
///
/// ```ignore
/// let system = time_phase!(collector, phase::EVALUATE, {
///     LinearSystem::evaluate(energy, &weights)
/// });
/// ```
#[macro_export]
macro_rules! time_phase {
    ($collector:expr, $phase:expr, $block:expr) => {{
        #[cfg(feature = "profiling")]
        let _timer = $crate::timing::Timer::new($phase);

        let result = $block;

        #[cfg(feature = "profiling")]
        $collector.record_phase($phase, _timer.elapsed_ms());

        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_phase_returns_block_value() {
        let mut collector = TimingCollector::new();
        collector.start_solve();
        collector.start_iteration();
        let value = crate::time_phase!(collector, crate::timing::phase::EVALUATE, { 2 + 3 });
        assert_eq!(value, 5);
        let iteration = collector.end_iteration();
        assert_eq!(iteration.is_some(), cfg!(feature = "profiling"));
    }

    #[test]
    fn test_timing_collector() {
        let mut collector = TimingCollector::new();

        collector.start_solve();
        collector.record_phase(phase::REMAP, 0.25);
        collector.start_iteration();
        collector.record_phase(phase::EVALUATE, 2.0);
        collector.record_phase(phase::LINEAR_SOLVE, 3.0);
        collector.record_phase(phase::APPLY, 0.5);
        let iteration = collector.end_iteration();
        let timing = collector.finish();

        #[cfg(feature = "profiling")]
        {
            let iteration = iteration.unwrap();
            assert_eq!(iteration.evaluate_ms, 2.0);
            let timing = timing.unwrap();
            assert_eq!(timing.iterations.len(), 1);
            assert_eq!(timing.remap_ms, 0.25);
            assert_eq!(timing.linear_solve_ms, 3.0);
            assert_eq!(timing.apply_ms, 0.5);
        }

        #[cfg(not(feature = "profiling"))]
        {
            assert!(iteration.is_none());
            assert!(timing.is_none());
        }
    }
}
