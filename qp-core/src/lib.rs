//! qp-core: a primal-dual active-set solver for convex quadratic programs
//!
//! Solves problems of the form
//!
//! ```text
//! minimize    (1/2) x^T H x + g^T x
//! subject to  lbx <= x <= ubx
//!             lba <= A x <= uba
//! ```
//!
//! with sparse symmetric positive-semidefinite `H` and sparse `A`, where
//! any bound may be infinite and equalities are written as `lb == ub`.
//!
//! # Algorithm
//!
//! The solver maintains a working set encoded in the signs of the
//! multiplier vector: positive means an upper bound is active, negative a
//! lower bound, zero inactive. Each iteration:
//!
//! - recomputes the objective, constraint values, Lagrangian gradient and
//!   the primal/dual error maxima,
//! - toggles at most one constraint (plus a companion when needed to keep
//!   the system regular), chosen to shrink whichever error dominates,
//! - factorizes the combined stationarity (KKT) system with a sparse
//!   Householder QR and solves for a primal-dual step,
//! - runs a two-phase piecewise-linear line search: first against bound
//!   violations, then against multiplier sign changes, tracking the dual
//!   infeasibility tangent exactly across its breakpoints.
//!
//! Rank-deficient working sets are handled explicitly: the step follows a
//! null-space direction scaled to land on the flip that restores rank
//! without increasing `max(|pr|, |du|)`.
//!
//! # Example
//!
//! ```ignore
//! use qp_core::{solve, QpData, Settings, WarmStart};
//! use qp_core::linalg::sparse;
//!
//! // min 0.5 (x1^2 + x2^2) s.t. x1 + x2 = 1
//! let prob = QpData {
//!     h: sparse::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
//!     g: vec![0.0, 0.0],
//!     a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
//!     lbx: vec![f64::NEG_INFINITY; 2],
//!     ubx: vec![f64::INFINITY; 2],
//!     lba: vec![1.0],
//!     uba: vec![1.0],
//! };
//! let result = solve(&prob, &WarmStart::default(), &Settings::default())?;
//! assert!(result.status.is_optimal());
//! ```

#![warn(clippy::all)]
#![allow(clippy::needless_range_loop)] // flat-buffer kernels index in lockstep

pub mod activeset;
pub mod linalg;
pub mod problem;

pub use activeset::ActiveSetSolver;
pub use problem::{
    QpData, QpError, Settings, SolveInfo, SolveResult, SolveStatus, WarmStart,
};

/// One-shot solve: analyze the structure, run the iteration, return the
/// solution.
///
/// For repeated solves on the same sparsity, build an [`ActiveSetSolver`]
/// once and call [`ActiveSetSolver::solve`] directly.
pub fn solve(
    data: &QpData,
    warm: &WarmStart,
    settings: &Settings,
) -> Result<SolveResult, QpError> {
    let mut solver = ActiveSetSolver::new(data, settings.clone())?;
    solver.solve(data, warm)
}
