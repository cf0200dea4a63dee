//! Two-phase piecewise-linear line search and the step taker.

use crate::activeset::solve::ActiveSetSolver;
use crate::activeset::{Proposal, DMIN};

impl ActiveSetSolver {
    /// Check for bound violations beyond `e` that the direction would make
    /// worse even at tau = 0. Returns the blocking change, largest step
    /// first, if any.
    fn zero_blocking(&mut self, e: f64) -> Option<(usize, i32)> {
        let mut found = None;
        let mut dz_max = 0.0;
        for i in 0..self.kkt.nz {
            let ws = &self.ws;
            if -ws.dz[i] > dz_max && ws.z[i] <= ws.lbz[i] - e {
                dz_max = -ws.dz[i];
                found = Some((i, -1));
                self.ws
                    .set_note(format_args!("Lower bound {} violated at 0", i));
            } else if ws.dz[i] > dz_max && ws.z[i] >= ws.ubz[i] + e {
                dz_max = ws.dz[i];
                found = Some((i, 1));
                self.ws
                    .set_note(format_args!("Upper bound {} violated at 0", i));
            }
        }
        found
    }

    /// Shrink `tau` until no coordinate moves further than `e` past a
    /// bound. When the blocking bound is one whose side is already active,
    /// the step is clipped without proposing an active-set change.
    fn primal_blocking(&mut self, e: f64, proposal: &mut Proposal) {
        if let Some((index, sign)) = self.zero_blocking(e) {
            self.ws.tau = 0.0;
            *proposal = Proposal::Change { index, sign };
            return;
        }
        for i in 0..self.kkt.nz {
            let ws = &mut self.ws;
            if ws.dz[i] == 0.0 {
                continue;
            }
            let trial_z = ws.z[i] + ws.tau * ws.dz[i];
            if ws.dz[i] < 0.0 && trial_z < ws.lbz[i] - e {
                ws.tau = (ws.lbz[i] - e - ws.z[i]) / ws.dz[i];
                *proposal = if ws.lam[i] < 0.0 {
                    Proposal::None
                } else {
                    Proposal::Change { index: i, sign: -1 }
                };
                self.ws
                    .set_note(format_args!("Enforcing lower bound {}", i));
            } else if ws.dz[i] > 0.0 && trial_z > ws.ubz[i] + e {
                ws.tau = (ws.ubz[i] + e - ws.z[i]) / ws.dz[i];
                *proposal = if ws.lam[i] > 0.0 {
                    Proposal::None
                } else {
                    Proposal::Change { index: i, sign: 1 }
                };
                self.ws
                    .set_note(format_args!("Enforcing upper bound {}", i));
            }
            if self.ws.tau <= 0.0 {
                return;
            }
        }
    }

    /// Enumerate the sign-change points of `lam + tau dlam` inside the
    /// current step, in ascending order, terminated by a sentinel at the
    /// current `tau`. Returns the list length.
    fn dual_breakpoints(&mut self, tau: f64) -> usize {
        let ws = &mut self.ws;
        ws.bp_tau[0] = tau;
        ws.bp_index[0] = -1;
        let mut n_tau = 1;
        for i in 0..ws.nz {
            if ws.dlam[i] == 0.0 || ws.lam[i] == 0.0 {
                continue;
            }
            let trial_lam = ws.lam[i] + tau * ws.dlam[i];
            let crosses = if ws.lam[i] > 0.0 {
                trial_lam < 0.0
            } else {
                trial_lam > 0.0
            };
            if !crosses {
                continue;
            }
            let new_tau = -ws.lam[i] / ws.dlam[i];
            // Insertion keeps the list sorted with the sentinel last.
            let mut loc = 0;
            while loc < n_tau - 1 && new_tau >= ws.bp_tau[loc] {
                loc += 1;
            }
            n_tau += 1;
            let mut next_tau = new_tau;
            let mut next_ind = i as isize;
            for j in loc..n_tau {
                std::mem::swap(&mut ws.bp_tau[j], &mut next_tau);
                std::mem::swap(&mut ws.bp_index[j], &mut next_ind);
            }
        }
        n_tau
    }

    /// Walk the breakpoint intervals, integrating `infeas` along the way,
    /// and clip `tau` at the first point where some dual infeasibility
    /// would exceed `e`. Returns the blocking variable, if any.
    fn dual_blocking(&mut self, e: f64) -> Option<usize> {
        let n = self.kkt.n;
        let n_tau = self.dual_breakpoints(self.ws.tau);
        let mut du_index = None;
        let mut tau_k = 0.0;
        for j in 0..n_tau {
            let dtau = self.ws.bp_tau[j] - tau_k;
            // Where would each dual infeasibility exceed e on this
            // interval?
            for k in 0..n {
                let ws = &mut self.ws;
                let new_infeas = ws.infeas[k] + dtau * ws.tinfeas[k];
                if new_infeas.abs() > e {
                    let lim = if new_infeas > 0.0 { e } else { -e };
                    let tau1 = (tau_k + (lim - ws.infeas[k]) / ws.tinfeas[k]).max(0.0);
                    if tau1 < ws.tau {
                        ws.tau = tau1;
                        du_index = Some(k);
                    }
                }
            }
            // Integrate the gradient over the accepted part of the
            // interval.
            {
                let ws = &mut self.ws;
                let adv = (ws.tau - tau_k).min(dtau);
                for k in 0..n {
                    ws.infeas[k] += adv * ws.tinfeas[k];
                }
            }
            if du_index.is_some() {
                return du_index;
            }
            tau_k = self.ws.bp_tau[j];
            let i = self.ws.bp_index[j];
            if i < 0 {
                break;
            }
            let i = i as usize;
            // Crossing zero removes this multiplier's contribution from
            // the tangent.
            if !self.ws.neverzero[i] {
                if i < n {
                    let ws = &mut self.ws;
                    ws.tinfeas[i] -= ws.dlam[i];
                } else {
                    let dlam_i = self.ws.dlam[i];
                    for k in self.kkt.sp_at.col_range(i - n) {
                        self.ws.tinfeas[self.kkt.sp_at.row[k]] -= self.kkt.nz_at[k] * dlam_i;
                    }
                }
            }
        }
        du_index
    }

    /// Apply the accepted step, snapping every multiplier back to the side
    /// recorded before the step so numerical drift cannot toggle the
    /// working set. Equality indices are allowed to change side.
    fn take_step(&mut self) {
        let ws = &mut self.ws;
        for i in 0..ws.nz {
            ws.lam_sign[i] = if ws.lam[i] > 0.0 {
                1
            } else if ws.lam[i] < 0.0 {
                -1
            } else {
                0
            };
        }
        for i in 0..ws.nz {
            ws.z[i] += ws.tau * ws.dz[i];
            ws.lam[i] += ws.tau * ws.dlam[i];
        }
        for i in 0..ws.nz {
            if ws.neverzero[i]
                && (if ws.lam_sign[i] < 0 {
                    ws.lam[i] > 0.0
                } else {
                    ws.lam[i] < 0.0
                })
            {
                ws.lam_sign[i] = -ws.lam_sign[i];
            }
            match ws.lam_sign[i] {
                -1 => ws.lam[i] = ws.lam[i].min(-DMIN),
                1 => ws.lam[i] = ws.lam[i].max(DMIN),
                _ => ws.lam[i] = 0.0,
            }
        }
    }

    /// Full line search: start from a unit step, clip it against bound
    /// violations and dual sign changes, then apply it. A dual block
    /// cancels any proposed active-set change.
    pub(crate) fn line_search(&mut self) -> Proposal {
        let mut proposal = Proposal::None;
        self.ws.tau = 1.0;
        let e_pr = self.ws.pr.max(self.ws.du / self.settings.du_to_pr);
        self.primal_blocking(e_pr, &mut proposal);
        let e_du = (self.ws.pr * self.settings.du_to_pr).max(self.ws.du);
        if self.dual_blocking(e_du).is_some() {
            proposal = Proposal::None;
        }
        self.take_step();
        proposal
    }
}
