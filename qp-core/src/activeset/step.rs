//! Newton-like step computation, including the singular rescale.

use crate::activeset::solve::ActiveSetSolver;
use crate::activeset::workspace::Workspace;
use crate::activeset::{LINDEP_TOL, TAU_GUARD, ZERO_STEP_TOL};
use crate::linalg::sparse::{mv, mv_t};
use crate::problem::QpError;

/// Outcome of a step computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum StepOutcome {
    /// Regular step from a nonsingular working set.
    Regular,
    /// Singular working set; the step was rescaled toward the recorded
    /// rank-restoring flip.
    Rescaled {
        /// Constraint to toggle next iteration
        index: usize,
        /// Target sign (0 deactivates)
        sign: i32,
    },
    /// No admissible rank-restoring direction exists.
    Failed,
}

impl Workspace {
    /// Right-hand side driving the working set to feasibility: active
    /// indices aim for their bound, inactive variables drive `lam_x` to
    /// the negative gradient, inactive constraints keep `lam` at zero.
    fn kkt_residual(&mut self) {
        for i in 0..self.nz {
            self.dz[i] = if self.lam[i] > 0.0 {
                self.ubz[i] - self.z[i]
            } else if self.lam[i] < 0.0 {
                self.lbz[i] - self.z[i]
            } else if i < self.n {
                self.lam[i] - self.infeas[i]
            } else {
                self.lam[i]
            };
        }
    }
}

impl ActiveSetSolver {
    /// Compute the search direction (dz, dlam) and its dual tangent.
    ///
    /// Nonsingular working sets take the Newton step from the KKT
    /// residual; singular ones move along a null-space direction, scaled
    /// by the second phase so that a full step reaches the flip that
    /// restores rank.
    pub(crate) fn calc_step(&mut self) -> Result<StepOutcome, QpError> {
        let n = self.kkt.n;

        if self.ws.sing == 0 {
            self.ws.kkt_residual();
            self.qr.solve(&mut self.ws.dz, true);
        } else {
            let imina = self.ws.imina;
            self.qr
                .nullspace_vector(&mut self.ws.dz, imina, 0, LINDEP_TOL);
        }

        // Change in the Lagrangian gradient determines dlam for the bounds.
        {
            let ws = &mut self.ws;
            let (dlx, _) = ws.dlam.split_at_mut(n);
            dlx.fill(0.0);
            mv(&self.kkt.sp_h, &self.kkt.nz_h, &ws.dz[..n], dlx);
            mv_t(&self.kkt.sp_a, &self.kkt.nz_a, &ws.dz[n..], dlx);
            for (i, d) in dlx.iter_mut().enumerate() {
                *d = if ws.lam[i] == 0.0 { 0.0 } else { -*d };
            }
        }
        // Constraint multipliers step with the solved direction; the
        // constraint values are then re-derived from the variables.
        {
            let ws = &mut self.ws;
            let (dzx, dza) = ws.dz.split_at_mut(n);
            ws.dlam[n..].copy_from_slice(dza);
            dza.fill(0.0);
            mv(&self.kkt.sp_a, &self.kkt.nz_a, dzx, dza);
        }
        for d in self.ws.dz.iter_mut() {
            if d.abs() < ZERO_STEP_TOL {
                *d = 0.0;
            }
        }

        // Tangent of the dual infeasibility at tau = 0.
        {
            let ws = &mut self.ws;
            ws.tinfeas.fill(0.0);
            mv(&self.kkt.sp_h, &self.kkt.nz_h, &ws.dz[..n], &mut ws.tinfeas);
            mv_t(&self.kkt.sp_a, &self.kkt.nz_a, &ws.dlam[n..], &mut ws.tinfeas);
            for i in 0..n {
                ws.tinfeas[i] += ws.dlam[i];
            }
        }

        self.scale_step()
    }

    /// For a singular working set, pick the step toward a rank-restoring
    /// flip with the smallest magnitude that does not increase
    /// `max(|pr|, |du|)`, and rescale the direction so a full step lands
    /// exactly on it.
    fn scale_step(&mut self) -> Result<StepOutcome, QpError> {
        if self.ws.sing == 0 {
            return Ok(StepOutcome::Regular);
        }

        // Slopes of pr and du along the direction.
        let tpr = match self.ws.ipr {
            None => 0.0,
            Some(ipr) => {
                if self.ws.z[ipr] > self.ws.ubz[ipr] {
                    self.ws.dz[ipr] / self.ws.pr
                } else {
                    -self.ws.dz[ipr] / self.ws.pr
                }
            }
        };
        let tdu = match self.ws.idu {
            None => 0.0,
            Some(idu) => self.ws.tinfeas[idu] / self.ws.infeas[idu],
        };

        // Which step signs keep max(pr, du) from growing, and the slope
        // of the dominating error.
        let mut pos_ok = true;
        let mut neg_ok = true;
        let terr;
        if self.ws.pr > self.ws.du {
            if tpr < 0.0 {
                neg_ok = false;
            } else if tpr > 0.0 {
                pos_ok = false;
            }
            terr = tpr;
        } else if self.ws.pr < self.ws.du {
            if tdu < 0.0 {
                neg_ok = false;
            } else if tdu > 0.0 {
                pos_ok = false;
            }
            terr = tdu;
        } else if (tpr > 0.0 && tdu < 0.0) || (tpr < 0.0 && tdu > 0.0) {
            // The errors tie and move in opposite directions: no scalar
            // step can decrease the maximum.
            pos_ok = false;
            neg_ok = false;
            terr = 0.0;
        } else if tpr.min(tdu) < 0.0 {
            neg_ok = false;
            terr = tpr.max(tdu);
        } else if tpr.max(tdu) > 0.0 {
            pos_ok = false;
            terr = tpr.min(tdu);
        } else {
            terr = 0.0;
        }

        // With a dominating primal error on an active constraint, only
        // let its multiplier grow in magnitude.
        if self.settings.du_to_pr * self.ws.pr >= self.ws.du {
            if let Some(ipr) = self.ws.ipr {
                if self.ws.lam[ipr] != 0.0 && self.ws.dlam[ipr].abs() > LINDEP_TOL {
                    if (self.ws.lam[ipr] > 0.0) == (self.ws.dlam[ipr] > 0.0) {
                        neg_ok = false;
                    } else {
                        pos_ok = false;
                    }
                }
            }
        }

        // The null space of the transposed system tells which constraints
        // can restore rank.
        self.factorize_transpose()?;
        let sing_tr = self.qr.singularity(LINDEP_TOL);

        let n = self.kkt.n;
        let mut tau = f64::INFINITY;
        let mut r_index = None;
        let mut r_sign = 0;
        for nulli in 0..sing_tr.count {
            self.qr
                .nullspace_vector(&mut self.ws.w, sing_tr.argmin, nulli, LINDEP_TOL);
            for i in 0..self.kkt.nz {
                // The outgoing column must carry weight in the direction.
                let gate = if i < n {
                    self.ws.dz[i]
                } else {
                    self.ws.dlam[i]
                };
                if gate.abs() < LINDEP_TOL {
                    continue;
                }
                // Flipping i must actually change the rank: the null
                // vector has to separate the two column states.
                if (self.kkt.dot(&self.ws.w, i, false) - self.kkt.dot(&self.ws.w, i, true)).abs()
                    < LINDEP_TOL
                {
                    continue;
                }
                if self.ws.lam[i] == 0.0 {
                    if self.ws.dz[i].abs() < LINDEP_TOL {
                        continue;
                    }
                    // Step that carries z[i] onto either bound.
                    if !self.ws.neverlower[i] {
                        let tau_test = (self.ws.lbz[i] - self.ws.z[i]) / self.ws.dz[i];
                        if !((terr > 0.0 && tau_test > 0.0) || (terr < 0.0 && tau_test < 0.0))
                            && tau_test.abs() >= TAU_GUARD
                            && tau_test.abs() < tau.abs()
                        {
                            tau = tau_test;
                            r_index = Some(i);
                            r_sign = -1;
                            self.ws.set_note(format_args!(
                                "Enforced lower bound {} for regularity",
                                i
                            ));
                        }
                    }
                    if !self.ws.neverupper[i] {
                        let tau_test = (self.ws.ubz[i] - self.ws.z[i]) / self.ws.dz[i];
                        if !((terr > 0.0 && tau_test > 0.0) || (terr < 0.0 && tau_test < 0.0))
                            && tau_test.abs() >= TAU_GUARD
                            && tau_test.abs() < tau.abs()
                        {
                            tau = tau_test;
                            r_index = Some(i);
                            r_sign = 1;
                            self.ws.set_note(format_args!(
                                "Enforced upper bound {} for regularity",
                                i
                            ));
                        }
                    }
                } else {
                    if self.ws.dlam[i].abs() < LINDEP_TOL {
                        continue;
                    }
                    // Step that zeros the multiplier.
                    if !self.ws.neverzero[i] {
                        let tau_test = -self.ws.lam[i] / self.ws.dlam[i];
                        if (terr > 0.0 && tau_test > 0.0) || (terr < 0.0 && tau_test < 0.0) {
                            continue;
                        }
                        if (tau_test > 0.0 && !pos_ok) || (tau_test < 0.0 && !neg_ok) {
                            continue;
                        }
                        if tau_test.abs() < tau.abs() {
                            tau = tau_test;
                            r_index = Some(i);
                            r_sign = 0;
                            let side = if self.ws.lam[i] > 0.0 { "upper" } else { "lower" };
                            self.ws.set_note(format_args!(
                                "Dropped {} bound {} for regularity",
                                side, i
                            ));
                        }
                    }
                }
            }
        }

        let Some(index) = r_index else {
            return Ok(StepOutcome::Failed);
        };
        // Rescale so that tau = 1 is a full step onto the flip.
        for d in self.ws.dz.iter_mut() {
            *d *= tau;
        }
        for d in self.ws.dlam.iter_mut() {
            *d *= tau;
        }
        for t in self.ws.tinfeas.iter_mut() {
            *t *= tau;
        }
        Ok(StepOutcome::Rescaled {
            index,
            sign: r_sign,
        })
    }
}
