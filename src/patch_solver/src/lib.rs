//! Patch-based nonlinear least-squares solver.
//!
//! This library minimizes sums of squared residuals over large per-pixel or
//! per-vertex unknown fields (depth maps, images, mesh vertices) with a block
//! Gauss-Newton method. The field is split into fixed-size patches and every
//! linear step is solved with patch-restricted preconditioned conjugate
//! gradient, run in parallel over patches with `rayon`.
//!
//! # Architecture
//!
//! A solve is split into phases:
//! - Phase 1: Validity mask and remapping (exclusive prefix sum compaction)
//! - Phase 2: Patch partition of the active elements
//! - Phase 3: Residual / Jacobian evaluation (JTJ, JTF, preconditioner)
//! - Phase 4: Block PCG linear solve with explicit boundary exchange
//! - Phase 5: Step application, repeated for every outer iteration
//!
//! # Usage
//!
//! ```ignore
//! use patch_solver::{CalibrationParams, ImageDims, PatchSolver, SfsInput, SolverParameters};
//!
//! let dims = ImageDims::new(640, 480);
//! let calibration = CalibrationParams::new(525.0, -525.0, 319.5, 239.5);
//! let mut solver = PatchSolver::<f32>::builder().patch_size(16).remapping(true).build(dims, calibration)?;
//!
//! let input = SfsInput::new(&target_depth, &intensity, &previous_depth, &mask, &edge_row, &edge_col);
//! let report = solver.solve_sfs(&input, &SolverParameters::default(), &mut depth)?;
//! println!("status: {:?}, final cost: {:?}", report.status, report.final_cost);
//! ```

pub mod backend;
pub mod diagnostics;
pub mod energy;
pub mod error;
pub mod linear;
pub mod patch;
pub mod remap;
pub mod solver;
pub mod test_utils;
pub mod timing;
pub mod types;

pub use backend::{BackendKind, BackendRegistry, NamedParam, NonlinearSolver, ParamValue};
pub use diagnostics::{DiagnosticsSink, RecordedSnapshot, Snapshot, SnapshotKind, SnapshotRecorder};
pub use energy::{
    ArapEnergy, Energy, EnergyWeights, MeshInput, MeshTopology, ProblemKind, ResidualRow,
    SfsEnergy, SfsInput, SmoothingEnergy,
};
pub use error::{Result, SolverError};
pub use patch::{PatchLayout, PatchLocation, PatchPartition};
pub use remap::Remapper;
pub use types::{CalibrationParams, ImageDims, LightingCoefficients, Real};

// High-level API (recommended for most users)
pub use solver::{
    IterationControl, IterationDebug, IterationObserver, IterationReport, MeshSolver, PatchSolver,
    PatchSolverBuilder, PatchSolverConfig, SolveDebug, SolveHooks, SolveReport, SolveStatus,
    SolverParameters,
};

/// Print only when the `test-verbose` feature is enabled.
#[macro_export]
macro_rules! test_println {
    ($($arg:tt)*) => {
        #[cfg(feature = "test-verbose")]
        println!($($arg)*);
    };
}
