//! Problem data, solver settings, and result types.

use std::fmt;

use thiserror::Error;

use crate::linalg::qr::QrError;
use crate::linalg::sparse::SparseCsc;

/// Convex quadratic program in the bound form
///
/// ```text
/// minimize    (1/2) x^T H x + g^T x
/// subject to  lbx <= x <= ubx
///             lba <= A x <= uba
/// ```
///
/// # Dimensions
///
/// - `n`: number of variables (length of `g`, `lbx`, `ubx`)
/// - `m`: number of linear constraints (rows of `A`, length of `lba`, `uba`)
/// - H: n × n, symmetric positive semidefinite
/// - A: m × n
///
/// Bounds may be ±∞; an equality is expressed as `lb == ub`.
#[derive(Debug, Clone)]
pub struct QpData {
    /// Quadratic cost matrix H (n × n, CSC). Must carry the full symmetric
    /// pattern, both triangles.
    pub h: SparseCsc,

    /// Linear cost vector g (length n)
    pub g: Vec<f64>,

    /// Constraint matrix A (m × n, CSC)
    pub a: SparseCsc,

    /// Variable lower bounds (length n, -inf allowed)
    pub lbx: Vec<f64>,

    /// Variable upper bounds (length n, +inf allowed)
    pub ubx: Vec<f64>,

    /// Constraint lower bounds (length m, -inf allowed)
    pub lba: Vec<f64>,

    /// Constraint upper bounds (length m, +inf allowed)
    pub uba: Vec<f64>,
}

/// Optional initial guesses for a solve. Absent fields default to zero.
#[derive(Debug, Clone, Default)]
pub struct WarmStart {
    /// Primal variables x (length n)
    pub x0: Option<Vec<f64>>,
    /// Variable bound multipliers (length n)
    pub lam_x0: Option<Vec<f64>>,
    /// Constraint multipliers (length m)
    pub lam_a0: Option<Vec<f64>>,
}

/// Solver settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum number of active-set iterations
    pub max_iter: usize,

    /// Tolerance. Not used by the iteration itself, which drives
    /// `max(|pr|, |du|)` to zero; kept for callers that post-check.
    pub tol: f64,

    /// How much larger a dual error is acceptable relative to the primal
    /// error: `du_to_pr * |pr|` is compared against `|du|`.
    pub du_to_pr: f64,

    /// Print a log line per iteration
    pub print_iter: bool,

    /// Print a banner at construction
    pub print_header: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-8,
            du_to_pr: 1000.0,
            print_iter: true,
            print_header: true,
        }
    }
}

/// Solve status.
///
/// `Optimal` corresponds to a zero return flag; both other statuses map to
/// the nonzero flag and still carry the best iterate found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// No further active-set change required
    Optimal,

    /// Iteration limit reached
    MaxIters,

    /// The working set went singular and no rank-restoring step exists
    /// without increasing the error
    StepFailure,
}

impl SolveStatus {
    /// Whether the solve finished at an optimum.
    pub fn is_optimal(&self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "Optimal"),
            SolveStatus::MaxIters => write!(f, "MaxIters"),
            SolveStatus::StepFailure => write!(f, "StepFailure"),
        }
    }
}

/// Solve result with solution and diagnostics.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Solution status
    pub status: SolveStatus,

    /// Primal solution x (length n)
    pub x: Vec<f64>,

    /// Multipliers of the variable bounds (length n). Positive means the
    /// upper bound is active, negative the lower bound.
    pub lam_x: Vec<f64>,

    /// Multipliers of the linear constraints (length m), same sign
    /// convention as `lam_x`.
    pub lam_a: Vec<f64>,

    /// Objective value at the solution
    pub f: f64,

    /// Solve diagnostics
    pub info: SolveInfo,
}

/// Solve diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SolveInfo {
    /// Number of iterations completed
    pub iters: usize,

    /// Largest bound violation at exit
    pub pr: f64,

    /// Largest dual infeasibility at exit
    pub du: f64,

    /// Wall-clock solve time (milliseconds)
    pub solve_time_ms: u64,
}

/// Setup errors. Anything that goes wrong after setup is reported through
/// [`SolveStatus`] instead, together with the best iterate found.
#[derive(Error, Debug)]
pub enum QpError {
    /// A problem array has the wrong length or a matrix the wrong shape.
    #[error("{what} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Which input is wrong
        what: &'static str,
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Matrices must be in compressed sparse column order.
    #[error("{what} must be in CSC storage order")]
    StorageOrder {
        /// Which input is wrong
        what: &'static str,
    },

    /// A lower bound exceeds the matching upper bound.
    #[error("infeasible bounds at index {index}: lower {lower} exceeds upper {upper}")]
    InfeasibleBounds {
        /// Combined index (variables first, then constraints)
        index: usize,
        /// Lower bound
        lower: f64,
        /// Upper bound
        upper: f64,
    },

    /// A bound is NaN.
    #[error("bound at index {index} is NaN")]
    InvalidBound {
        /// Combined index (variables first, then constraints)
        index: usize,
    },

    /// No admissible multiplier sign exists for an index.
    #[error("no admissible multiplier sign for index {index}")]
    UnrepresentableSign {
        /// Combined index (variables first, then constraints)
        index: usize,
    },

    /// H does not carry a structurally symmetric pattern.
    #[error("H must carry a structurally symmetric pattern, both triangles")]
    AsymmetricHessian,

    /// A re-solve was attempted with a different sparsity structure.
    #[error("problem sparsity differs from the analyzed structure")]
    PatternMismatch,

    /// The QR backend rejected the KKT structure.
    #[error(transparent)]
    Factorization(#[from] QrError),
}

impl QpData {
    /// Number of variables (n).
    pub fn num_vars(&self) -> usize {
        self.g.len()
    }

    /// Number of linear constraints (m).
    pub fn num_cons(&self) -> usize {
        self.lba.len()
    }

    /// Validate dimensions, storage order, and bound consistency.
    pub fn validate(&self) -> Result<(), QpError> {
        let n = self.num_vars();
        let m = self.num_cons();

        if !self.h.is_csc() {
            return Err(QpError::StorageOrder { what: "H" });
        }
        if !self.a.is_csc() {
            return Err(QpError::StorageOrder { what: "A" });
        }
        if self.h.rows() != n || self.h.cols() != n {
            return Err(QpError::DimensionMismatch {
                what: "H",
                expected: n,
                actual: self.h.rows(),
            });
        }
        if self.a.rows() != m {
            return Err(QpError::DimensionMismatch {
                what: "A rows",
                expected: m,
                actual: self.a.rows(),
            });
        }
        if self.a.cols() != n {
            return Err(QpError::DimensionMismatch {
                what: "A cols",
                expected: n,
                actual: self.a.cols(),
            });
        }
        if self.lbx.len() != n || self.ubx.len() != n {
            return Err(QpError::DimensionMismatch {
                what: "variable bounds",
                expected: n,
                actual: self.lbx.len().min(self.ubx.len()),
            });
        }
        if self.uba.len() != m {
            return Err(QpError::DimensionMismatch {
                what: "constraint bounds",
                expected: m,
                actual: self.uba.len(),
            });
        }

        let bounds = self
            .lbx
            .iter()
            .zip(self.ubx.iter())
            .chain(self.lba.iter().zip(self.uba.iter()));
        for (i, (&lb, &ub)) in bounds.enumerate() {
            if lb.is_nan() || ub.is_nan() {
                return Err(QpError::InvalidBound { index: i });
            }
            if lb > ub {
                return Err(QpError::InfeasibleBounds {
                    index: i,
                    lower: lb,
                    upper: ub,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::from_triplets;

    fn unit_problem() -> QpData {
        QpData {
            h: from_triplets(1, 1, vec![(0, 0, 1.0)]),
            g: vec![0.0],
            a: from_triplets(0, 1, Vec::new()),
            lbx: vec![0.0],
            ubx: vec![1.0],
            lba: Vec::new(),
            uba: Vec::new(),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(unit_problem().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_crossed_bounds() {
        let mut prob = unit_problem();
        prob.lbx = vec![1.0];
        prob.ubx = vec![0.0];
        match prob.validate() {
            Err(QpError::InfeasibleBounds { index: 0, .. }) => {}
            other => panic!("expected infeasible bounds, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_validate_rejects_nan_bound() {
        let mut prob = unit_problem();
        prob.ubx = vec![f64::NAN];
        assert!(matches!(
            prob.validate(),
            Err(QpError::InvalidBound { index: 0 })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_shape() {
        let mut prob = unit_problem();
        prob.g = vec![0.0, 0.0];
        assert!(matches!(
            prob.validate(),
            Err(QpError::DimensionMismatch { .. })
        ));
    }
}
