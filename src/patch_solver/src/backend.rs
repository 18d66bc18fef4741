//! Solver backends and the registry that selects them.
//!
//! A backend is a [`NonlinearSolver`] keyed by `(ProblemKind, BackendKind)`.
//! Two native backends are built in:
//! - `NativeBlock`: Gauss-Newton with block PCG over patches
//! - `LibraryNlls`: Gauss-Newton with one global PCG (reference solver)
//!
//! `CompiledAutodiff` plans are registered by the caller. Plans are shared
//! through `Arc`; the registry is handed to every solver instance that
//! needs it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::energy::{Energy, ProblemKind};
use crate::error::{Result, SolverError};
use crate::linear::LinearStrategy;
use crate::solver::{driver, SolveHooks, SolveReport, SolverParameters};
use crate::types::Real;

/// Backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Hand-written block Gauss-Newton / PCG.
    #[default]
    NativeBlock,
    /// Auto-differentiated compiled solver (external registration).
    CompiledAutodiff,
    /// General nonlinear least-squares library.
    LibraryNlls,
}

/// Value of a named plan parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ParamValue {
    Float(f64),
    Uint(u32),
}

/// One entry of the ordered parameter list handed to external plans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedParam {
    pub name: String,
    pub value: ParamValue,
}

impl NamedParam {
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A nonlinear least-squares backend.
///
/// `solve` updates the energy's unknowns in place.
pub trait NonlinearSolver<T: Real>: Send + Sync {
    fn name(&self) -> &str;

    fn solve(
        &self,
        energy: &mut dyn Energy<T>,
        params: &SolverParameters,
        hooks: &mut SolveHooks<'_>,
    ) -> Result<SolveReport>;
}

/// Gauss-Newton with a native linear solver.
#[derive(Debug, Clone, Copy)]
pub struct GaussNewtonBackend {
    strategy: LinearStrategy,
}

impl GaussNewtonBackend {
    /// Block PCG over patches.
    pub fn block() -> Self {
        Self {
            strategy: LinearStrategy::BlockPcg,
        }
    }

    /// Global PCG with the same total iteration budget.
    pub fn global() -> Self {
        Self {
            strategy: LinearStrategy::GlobalPcg,
        }
    }

    pub fn strategy(&self) -> LinearStrategy {
        self.strategy
    }
}

impl<T: Real> NonlinearSolver<T> for GaussNewtonBackend {
    fn name(&self) -> &str {
        match self.strategy {
            LinearStrategy::BlockPcg => "native_block",
            LinearStrategy::GlobalPcg => "global_pcg",
        }
    }

    fn solve(
        &self,
        energy: &mut dyn Energy<T>,
        params: &SolverParameters,
        hooks: &mut SolveHooks<'_>,
    ) -> Result<SolveReport> {
        let label = NonlinearSolver::<T>::name(self);
        Ok(driver::run(energy, params, self.strategy, label, hooks))
    }
}

/// Backends keyed by problem and backend kind.
pub struct BackendRegistry<T: Real> {
    entries: HashMap<(ProblemKind, BackendKind), Arc<dyn NonlinearSolver<T>>>,
}

impl<T: Real> Default for BackendRegistry<T> {
    fn default() -> Self {
        Self::with_native_backends()
    }
}

impl<T: Real> std::fmt::Debug for BackendRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort_by_key(|(p, b)| (p.name(), *b as u8));
        f.debug_struct("BackendRegistry").field("entries", &keys).finish()
    }
}

impl<T: Real> BackendRegistry<T> {
    /// Registry without any backend.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry with `NativeBlock` and `LibraryNlls` for every problem kind.
    pub fn with_native_backends() -> Self {
        let mut registry = Self::empty();
        let block: Arc<dyn NonlinearSolver<T>> = Arc::new(GaussNewtonBackend::block());
        let global: Arc<dyn NonlinearSolver<T>> = Arc::new(GaussNewtonBackend::global());
        for problem in ProblemKind::ALL {
            registry.register(problem, BackendKind::NativeBlock, Arc::clone(&block));
            registry.register(problem, BackendKind::LibraryNlls, Arc::clone(&global));
        }
        registry
    }

    /// Add or replace a backend. Returns the previous one, if any.
    pub fn register(
        &mut self,
        problem: ProblemKind,
        backend: BackendKind,
        solver: Arc<dyn NonlinearSolver<T>>,
    ) -> Option<Arc<dyn NonlinearSolver<T>>> {
        self.entries.insert((problem, backend), solver)
    }

    pub fn get(&self, problem: ProblemKind, backend: BackendKind) -> Result<Arc<dyn NonlinearSolver<T>>> {
        self.entries
            .get(&(problem, backend))
            .cloned()
            .ok_or(SolverError::BackendUnavailable { problem, backend })
    }

    pub fn contains(&self, problem: ProblemKind, backend: BackendKind) -> bool {
        self.entries.contains_key(&(problem, backend))
    }
}
