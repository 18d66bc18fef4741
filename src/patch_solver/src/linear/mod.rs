//! Linearized normal equations and their iterative solvers.

pub mod pcg;
pub mod system;

pub use pcg::{solve_block_pcg, solve_global_pcg};
pub use system::{evaluate_cost, LinearSystem};

use serde::{Deserialize, Serialize};

/// Which linear solver a Gauss-Newton step uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearStrategy {
    /// Patch-restricted PCG passes with explicit boundary exchange.
    BlockPcg,
    /// One PCG over all unknowns.
    GlobalPcg,
}
