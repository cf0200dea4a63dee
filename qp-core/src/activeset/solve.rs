//! Iteration driver for the active-set solver.

use std::time::Instant;

use crate::activeset::kkt::KktData;
use crate::activeset::step::StepOutcome;
use crate::activeset::workspace::Workspace;
use crate::activeset::{Proposal, DMIN};
use crate::linalg::qr::SparseQr;
use crate::linalg::sparse::{gather, kkt_pattern, mv, transpose_pattern, CscPattern};
use crate::problem::{QpData, QpError, Settings, SolveInfo, SolveResult, SolveStatus, WarmStart};

/// Active-set solver with reusable symbolic data.
///
/// Construction analyzes the problem sparsity (transpose of A, the
/// combined KKT pattern, and the QR structure) and allocates every
/// buffer; [`ActiveSetSolver::solve`] then runs allocation-free and may
/// be called repeatedly with new numeric values on the same structure.
pub struct ActiveSetSolver {
    pub(crate) settings: Settings,
    pub(crate) kkt: KktData,
    pub(crate) qr: SparseQr,
    pub(crate) ws: Workspace,
}

impl ActiveSetSolver {
    /// Analyze the problem structure and allocate the workspace.
    pub fn new(data: &QpData, settings: Settings) -> Result<Self, QpError> {
        data.validate()?;
        let n = data.num_vars();
        let m = data.num_cons();
        let nz = n + m;

        let sp_h = CscPattern::from_mat(&data.h);
        let sp_a = CscPattern::from_mat(&data.a);
        let (sp_at, at_map) = transpose_pattern(&sp_a);
        let sp_kkt = kkt_pattern(&sp_h, &sp_a, &sp_at);
        // The KKT pattern is structurally symmetric for a symmetric H;
        // the in-pattern transpose permutation depends on it.
        let (sp_kkt_t, kkt_tmap) = transpose_pattern(&sp_kkt);
        if sp_kkt_t.colind != sp_kkt.colind || sp_kkt_t.row != sp_kkt.row {
            return Err(QpError::AsymmetricHessian);
        }
        let qr = SparseQr::new(&sp_kkt)?;

        if settings.print_header {
            eprintln!("-------------------------------------------");
            eprintln!("Primal-dual active-set QP solver");
            eprintln!("Number of variables:   {:9}", n);
            eprintln!("Number of constraints: {:9}", m);
            eprintln!("-------------------------------------------");
        }

        let nnz_kkt = sp_kkt.nnz();
        Ok(Self {
            settings,
            kkt: KktData {
                n,
                m,
                nz,
                nz_h: vec![0.0; sp_h.nnz()],
                nz_a: vec![0.0; sp_a.nnz()],
                nz_at: vec![0.0; sp_at.nnz()],
                g: vec![0.0; n],
                sp_h,
                sp_a,
                sp_at,
                sp_kkt,
                at_map,
                kkt_tmap,
                nz_kkt: vec![0.0; nnz_kkt],
                kkt_t: vec![0.0; nnz_kkt],
            },
            qr,
            ws: Workspace::new(n, m),
        })
    }

    /// Solve with the given numeric data and optional initial guesses.
    ///
    /// The data must carry the same sparsity the solver was built with.
    pub fn solve(&mut self, data: &QpData, warm: &WarmStart) -> Result<SolveResult, QpError> {
        self.check_pattern(data)?;
        let start = Instant::now();
        let n = self.kkt.n;
        let nz = self.kkt.nz;

        // Numeric problem data for this solve.
        self.kkt.nz_h.copy_from_slice(data.h.data());
        self.kkt.nz_a.copy_from_slice(data.a.data());
        self.kkt.g.copy_from_slice(&data.g);
        gather(&self.kkt.at_map, &self.kkt.nz_a, &mut self.kkt.nz_at);

        let ws = &mut self.ws;
        ws.lbz[..n].copy_from_slice(&data.lbx);
        ws.lbz[n..].copy_from_slice(&data.lba);
        ws.ubz[..n].copy_from_slice(&data.ubx);
        ws.ubz[n..].copy_from_slice(&data.uba);

        // Initial point and multipliers, zero where not supplied.
        ws.z.fill(0.0);
        ws.lam.fill(0.0);
        if let Some(x0) = &warm.x0 {
            copy_guess("x0", x0, &mut ws.z[..n])?;
        }
        if let Some(lam_x0) = &warm.lam_x0 {
            copy_guess("lam_x0", lam_x0, &mut ws.lam[..n])?;
        }
        if let Some(lam_a0) = &warm.lam_a0 {
            copy_guess("lam_a0", lam_a0, &mut ws.lam[n..])?;
        }
        // Constraint values of the initial point decide which side an
        // equality row starts on.
        {
            let (zx, za) = ws.z.split_at_mut(n);
            za.fill(0.0);
            mv(&self.kkt.sp_a, &self.kkt.nz_a, zx, za);
        }

        // Admissible-sign flags, and push the initial multipliers off any
        // forbidden sign.
        for i in 0..nz {
            ws.neverzero[i] = ws.lbz[i] == ws.ubz[i];
            ws.neverupper[i] = ws.ubz[i].is_infinite();
            ws.neverlower[i] = ws.lbz[i].is_infinite();
            if ws.neverzero[i] && ws.neverupper[i] && ws.neverlower[i] {
                return Err(QpError::UnrepresentableSign { index: i });
            }
            if ws.neverzero[i] && ws.lam[i] == 0.0 {
                ws.lam[i] = if ws.neverupper[i] || ws.z[i] - ws.lbz[i] <= ws.ubz[i] - ws.z[i] {
                    -DMIN
                } else {
                    DMIN
                };
            } else if ws.neverupper[i] && ws.lam[i] > 0.0 {
                ws.lam[i] = if ws.neverzero[i] { -DMIN } else { 0.0 };
            } else if ws.neverlower[i] && ws.lam[i] < 0.0 {
                ws.lam[i] = if ws.neverzero[i] { DMIN } else { 0.0 };
            }
        }

        ws.dz.fill(0.0);
        ws.dlam.fill(0.0);
        ws.infeas.fill(0.0);
        ws.tinfeas.fill(0.0);
        ws.f = 0.0;
        ws.pr = 0.0;
        ws.ipr = None;
        ws.du = 0.0;
        ws.idu = None;
        ws.tau = 0.0;
        ws.sing = 0;
        ws.mina = 0.0;
        ws.imina = 0;
        ws.note.clear();

        let mut proposal = Proposal::Applied;
        let mut hint: Option<(usize, i32)> = None;
        let mut iter = 0usize;
        let status = loop {
            self.recompute();
            self.flip(&mut proposal, hint);

            self.factorize()?;
            if self.settings.print_iter {
                self.log_iteration(iter);
            }

            // Converged once a full pass requests no further change.
            if proposal == Proposal::None {
                break SolveStatus::Optimal;
            }
            if iter >= self.settings.max_iter {
                eprintln!("qp-core: maximum number of iterations reached");
                break SolveStatus::MaxIters;
            }
            iter += 1;
            self.ws.note.clear();

            hint = match self.calc_step()? {
                StepOutcome::Regular => None,
                StepOutcome::Rescaled { index, sign } => Some((index, sign)),
                StepOutcome::Failed => {
                    eprintln!("qp-core: failed to calculate search direction");
                    break SolveStatus::StepFailure;
                }
            };
            proposal = self.line_search();
        };

        let ws = &self.ws;
        Ok(SolveResult {
            status,
            x: ws.z[..n].to_vec(),
            lam_x: ws.lam[..n].to_vec(),
            lam_a: ws.lam[n..].to_vec(),
            f: ws.f,
            info: SolveInfo {
                iters: iter,
                pr: ws.pr,
                du: ws.du,
                solve_time_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    /// The numeric data of a re-solve must match the analyzed structure.
    fn check_pattern(&self, data: &QpData) -> Result<(), QpError> {
        data.validate()?;
        let h_indptr = data.h.indptr();
        let a_indptr = data.a.indptr();
        let same = data.h.rows() == self.kkt.n
            && data.a.rows() == self.kkt.m
            && data.a.cols() == self.kkt.n
            && h_indptr.raw_storage() == &self.kkt.sp_h.colind[..]
            && data.h.indices() == &self.kkt.sp_h.row[..]
            && a_indptr.raw_storage() == &self.kkt.sp_a.colind[..]
            && data.a.indices() == &self.kkt.sp_a.row[..];
        if same {
            Ok(())
        } else {
            Err(QpError::PatternMismatch)
        }
    }

    fn log_iteration(&self, iter: usize) {
        if iter % 10 == 0 {
            eprintln!(
                "{:>5} {:>5} {:>10} {:>10} {:>5} {:>10} {:>5} {:>10} {:>5} {:>10}  {}",
                "Iter", "Sing", "fk", "|pr|", "con", "|du|", "var", "min_R", "con", "last_tau",
                "Note"
            );
        }
        let ws = &self.ws;
        let ipr = ws.ipr.map(|i| i as isize).unwrap_or(-1);
        let idu = ws.idu.map(|i| i as isize).unwrap_or(-1);
        eprintln!(
            "{:>5} {:>5} {:>10.2e} {:>10.2e} {:>5} {:>10.2e} {:>5} {:>10.2e} {:>5} {:>10.2e}  {}",
            iter, ws.sing, ws.f, ws.pr, ipr, ws.du, idu, ws.mina, ws.imina, ws.tau, ws.note
        );
    }
}

fn copy_guess(what: &'static str, src: &[f64], dst: &mut [f64]) -> Result<(), QpError> {
    if src.len() != dst.len() {
        return Err(QpError::DimensionMismatch {
            what,
            expected: dst.len(),
            actual: src.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}
