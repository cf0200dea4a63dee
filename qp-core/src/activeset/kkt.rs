//! Assembly of the combined stationarity (KKT) system.
//!
//! The system is built row by row from the current working set: an
//! inactive variable row carries its H row and A column, an active one
//! collapses to a unit row; an active constraint row carries the matching
//! A row, an inactive one a negative unit row. Rows are stored as columns
//! of the structurally symmetric KKT pattern, so the step computation
//! solves against the transpose.

use crate::activeset::solve::ActiveSetSolver;
use crate::activeset::LINDEP_TOL;
use crate::linalg::sparse::{gather, CscPattern};
use crate::problem::QpError;

/// Problem matrices and the assembled KKT values, fixed sparsity.
#[derive(Debug)]
pub(crate) struct KktData {
    pub n: usize,
    pub m: usize,
    pub nz: usize,

    pub sp_h: CscPattern,
    pub sp_a: CscPattern,
    pub sp_at: CscPattern,
    pub sp_kkt: CscPattern,
    /// Gather map from A values into A^T values
    pub at_map: Vec<usize>,
    /// In-pattern transpose permutation of the KKT values
    pub kkt_tmap: Vec<usize>,

    pub nz_h: Vec<f64>,
    pub nz_a: Vec<f64>,
    pub nz_at: Vec<f64>,
    pub g: Vec<f64>,

    /// Assembled KKT values (rows stored as columns)
    pub nz_kkt: Vec<f64>,
    /// Scratch for the transposed KKT values
    pub kkt_t: Vec<f64>,
}

impl KktData {
    /// Fill the KKT values for the working set encoded in `lam`.
    ///
    /// `w` is a dense length-`nz` scratch vector, zero on entry and on
    /// exit.
    pub fn assemble(&mut self, lam: &[f64], w: &mut [f64]) {
        let n = self.n;
        w.fill(0.0);
        for i in 0..self.nz {
            if i < n {
                if lam[i] == 0.0 {
                    for k in self.sp_h.col_range(i) {
                        w[self.sp_h.row[k]] = self.nz_h[k];
                    }
                    for k in self.sp_a.col_range(i) {
                        w[n + self.sp_a.row[k]] = self.nz_a[k];
                    }
                } else {
                    w[i] = 1.0;
                }
            } else if lam[i] == 0.0 {
                w[i] = -1.0;
            } else {
                for k in self.sp_at.col_range(i - n) {
                    w[self.sp_at.row[k]] = self.nz_at[k];
                }
            }
            // Gather the row into the pattern and restore the scratch.
            for k in self.sp_kkt.col_range(i) {
                self.nz_kkt[k] = w[self.sp_kkt.row[k]];
                w[self.sp_kkt.row[k]] = 0.0;
            }
        }
    }

    /// What column `i` of the system would be with the index in the given
    /// activity state. Used to probe prospective working-set changes.
    pub fn column(&self, out: &mut [f64], i: usize, active: bool) {
        let n = self.n;
        out.fill(0.0);
        if i < n {
            if active {
                out[i] = 1.0;
            } else {
                for k in self.sp_h.col_range(i) {
                    out[self.sp_h.row[k]] = self.nz_h[k];
                }
                for k in self.sp_a.col_range(i) {
                    out[n + self.sp_a.row[k]] = self.nz_a[k];
                }
            }
        } else if active {
            for k in self.sp_at.col_range(i - n) {
                out[self.sp_at.row[k]] = self.nz_at[k];
            }
        } else {
            out[i] = -1.0;
        }
    }

    /// Dot product of `v` with the prospective column `i`, without
    /// materializing it.
    pub fn dot(&self, v: &[f64], i: usize, active: bool) -> f64 {
        let n = self.n;
        if i < n {
            if active {
                v[i]
            } else {
                let mut d = 0.0;
                for k in self.sp_h.col_range(i) {
                    d += v[self.sp_h.row[k]] * self.nz_h[k];
                }
                for k in self.sp_a.col_range(i) {
                    d += v[n + self.sp_a.row[k]] * self.nz_a[k];
                }
                d
            }
        } else if active {
            let mut d = 0.0;
            for k in self.sp_at.col_range(i - n) {
                d += v[self.sp_at.row[k]] * self.nz_at[k];
            }
            d
        } else {
            -v[i]
        }
    }

    /// Largest dual infeasibility that deactivating index `i` would leave
    /// behind.
    pub fn du_check(&self, infeas: &[f64], lam: &[f64], i: usize) -> f64 {
        if i < self.n {
            (infeas[i] - lam[i]).abs()
        } else {
            let mut new_du = 0.0_f64;
            for k in self.sp_at.col_range(i - self.n) {
                new_du = new_du.max((infeas[self.sp_at.row[k]] - self.nz_at[k] * lam[i]).abs());
            }
            new_du
        }
    }
}

impl ActiveSetSolver {
    /// Assemble and factorize the KKT system for the current working set,
    /// recording its rank state.
    pub(crate) fn factorize(&mut self) -> Result<(), QpError> {
        self.kkt.assemble(&self.ws.lam, &mut self.ws.w);
        self.qr.factorize(&self.kkt.nz_kkt)?;
        let sing = self.qr.singularity(LINDEP_TOL);
        self.ws.sing = sing.count;
        self.ws.mina = sing.min_diag;
        self.ws.imina = sing.argmin;
        Ok(())
    }

    /// Refactorize the transpose of the assembled system in place. The
    /// previous factorization is overwritten; the next iteration starts
    /// from a fresh assembly anyway.
    pub(crate) fn factorize_transpose(&mut self) -> Result<(), QpError> {
        let kkt = &mut self.kkt;
        gather(&kkt.kkt_tmap, &kkt.nz_kkt, &mut kkt.kkt_t);
        kkt.nz_kkt.copy_from_slice(&kkt.kkt_t);
        self.qr.factorize(&self.kkt.nz_kkt)?;
        Ok(())
    }
}
