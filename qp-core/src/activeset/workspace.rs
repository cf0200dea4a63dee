//! Mutable solver state for the active-set iteration.

use std::fmt::{self, Write};

use crate::activeset::solve::ActiveSetSolver;
use crate::activeset::DMIN;
use crate::linalg::sparse::{bilin, mv, mv_t};

/// Flat per-solve state. Every buffer is sized at construction; the
/// iteration itself never allocates.
#[derive(Debug)]
pub(crate) struct Workspace {
    pub n: usize,
    pub nz: usize,

    /// Combined primal point: variables, then constraint values A z[..n]
    pub z: Vec<f64>,
    /// Multipliers; the sign encodes the working set
    pub lam: Vec<f64>,
    /// Combined lower bounds (variables, then constraints)
    pub lbz: Vec<f64>,
    /// Combined upper bounds
    pub ubz: Vec<f64>,
    /// Primal search direction
    pub dz: Vec<f64>,
    /// Dual search direction
    pub dlam: Vec<f64>,
    /// Lagrangian gradient
    pub infeas: Vec<f64>,
    /// Directional derivative of `infeas` along the current step
    pub tinfeas: Vec<f64>,

    /// lb == ub: the multiplier may never vanish
    pub neverzero: Vec<bool>,
    /// ub == inf: the multiplier may never be positive
    pub neverupper: Vec<bool>,
    /// lb == -inf: the multiplier may never be negative
    pub neverlower: Vec<bool>,

    /// Dense scratch vector
    pub w: Vec<f64>,
    /// Breakpoint locations for the dual line search
    pub bp_tau: Vec<f64>,
    /// Breakpoint constraint indices (-1 terminates the list)
    pub bp_index: Vec<isize>,
    /// Multiplier sign snapshot taken before a step
    pub lam_sign: Vec<i8>,

    /// Objective value
    pub f: f64,
    /// Largest bound violation and its index
    pub pr: f64,
    pub ipr: Option<usize>,
    /// Largest dual infeasibility and its index
    pub du: f64,
    pub idu: Option<usize>,
    /// Accepted step length of the last line search
    pub tau: f64,
    /// Rank deficiency of the last factorization
    pub sing: usize,
    /// Smallest |R| diagonal of the last factorization and its column
    pub mina: f64,
    pub imina: usize,

    /// Last event message, shown in the iteration log
    pub note: String,
}

impl Workspace {
    pub fn new(n: usize, m: usize) -> Self {
        let nz = n + m;
        Self {
            n,
            nz,
            z: vec![0.0; nz],
            lam: vec![0.0; nz],
            lbz: vec![0.0; nz],
            ubz: vec![0.0; nz],
            dz: vec![0.0; nz],
            dlam: vec![0.0; nz],
            infeas: vec![0.0; n],
            tinfeas: vec![0.0; n],
            neverzero: vec![false; nz],
            neverupper: vec![false; nz],
            neverlower: vec![false; nz],
            w: vec![0.0; nz],
            bp_tau: vec![0.0; nz + 1],
            bp_index: vec![-1; nz + 1],
            lam_sign: vec![0; nz],
            f: 0.0,
            pr: 0.0,
            ipr: None,
            du: 0.0,
            idu: None,
            tau: 0.0,
            sing: 0,
            mina: 0.0,
            imina: 0,
            note: String::new(),
        }
    }

    /// Record an event message, replacing any earlier one.
    pub fn set_note(&mut self, args: fmt::Arguments<'_>) {
        self.note.clear();
        let _ = self.note.write_fmt(args);
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl ActiveSetSolver {
    /// Refresh every quantity derived from (z, lam): the objective, the
    /// constraint values, the Lagrangian gradient, the capped multiplier
    /// magnitudes, and the primal/dual error maxima.
    pub(crate) fn recompute(&mut self) {
        let n = self.kkt.n;
        let nz = self.kkt.nz;
        let ws = &mut self.ws;

        ws.f = bilin(&self.kkt.sp_h, &self.kkt.nz_h, &ws.z[..n], &ws.z[..n]) / 2.0
            + dot(&self.kkt.g, &ws.z[..n]);

        // Constraint values track the variables exactly.
        let (zx, za) = ws.z.split_at_mut(n);
        za.fill(0.0);
        mv(&self.kkt.sp_a, &self.kkt.nz_a, zx, za);

        // Lagrangian gradient g + H z + A^T lam_a.
        ws.infeas.copy_from_slice(&self.kkt.g);
        mv(&self.kkt.sp_h, &self.kkt.nz_h, &ws.z[..n], &mut ws.infeas);
        mv_t(&self.kkt.sp_a, &self.kkt.nz_a, &ws.lam[n..], &mut ws.infeas);

        // Active bound multipliers absorb the gradient without changing
        // sign; what remains is the dual infeasibility.
        for i in 0..n {
            if ws.lam[i] > 0.0 {
                ws.lam[i] = (-ws.infeas[i]).max(DMIN);
            } else if ws.lam[i] < 0.0 {
                ws.lam[i] = (-ws.infeas[i]).min(-DMIN);
            }
            ws.infeas[i] += ws.lam[i];
        }

        // Largest bound violation.
        ws.pr = 0.0;
        ws.ipr = None;
        for i in 0..nz {
            if ws.z[i] > ws.ubz[i] + ws.pr {
                ws.pr = ws.z[i] - ws.ubz[i];
                ws.ipr = Some(i);
            } else if ws.z[i] < ws.lbz[i] - ws.pr {
                ws.pr = ws.lbz[i] - ws.z[i];
                ws.ipr = Some(i);
            }
        }

        // Largest dual infeasibility.
        ws.du = 0.0;
        ws.idu = None;
        for i in 0..n {
            if ws.infeas[i] > ws.du {
                ws.du = ws.infeas[i];
                ws.idu = Some(i);
            } else if ws.infeas[i] < -ws.du {
                ws.du = -ws.infeas[i];
                ws.idu = Some(i);
            }
        }
    }
}
