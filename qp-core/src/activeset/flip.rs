//! Active-set decision: which constraint to add, remove, or flip next.

use crate::activeset::solve::ActiveSetSolver;
use crate::activeset::{Proposal, DMIN, LINDEP_TOL, TAU_GUARD};
use crate::linalg::sparse::mv;

/// Result of probing a working-set change against the current
/// factorization.
enum FlipCheck {
    /// The new column is linearly independent; the change is safe.
    Independent,
    /// The change alone would singularize, but flipping the companion as
    /// well keeps the system regular.
    Companion { index: usize, sign: i32 },
    /// The change singularizes and no companion exists.
    NoCompanion,
}

#[inline]
fn sign_token(sign: i32) -> f64 {
    match sign.cmp(&0) {
        std::cmp::Ordering::Greater => DMIN,
        std::cmp::Ordering::Less => -DMIN,
        std::cmp::Ordering::Equal => 0.0,
    }
}

impl ActiveSetSolver {
    /// Candidate that reduces the primal error: activate the most violated
    /// bound, if its multiplier is free.
    fn pr_index(&mut self) -> Option<(usize, i32)> {
        let ipr = self.ws.ipr?;
        if self.ws.lam[ipr] != 0.0 {
            return None;
        }
        let sign = if self.ws.z[ipr] < self.ws.lbz[ipr] {
            -1
        } else {
            1
        };
        self.ws
            .set_note(format_args!("Added {} to reduce |pr|", ipr));
        Some((ipr, sign))
    }

    /// Candidate that reduces the dual error: deactivate the constraint
    /// whose removal moves the worst gradient entry the most, without
    /// letting any other entry grow past the current maximum.
    fn du_index(&mut self) -> Option<(usize, i32)> {
        let n = self.kkt.n;
        let idu = self.ws.idu?;
        // Sensitivity of infeas[idu] to each multiplier.
        {
            let ws = &mut self.ws;
            ws.w.fill(0.0);
            ws.w[idu] = if ws.infeas[idu] > 0.0 { -1.0 } else { 1.0 };
            let (wx, wa) = ws.w.split_at_mut(n);
            mv(&self.kkt.sp_a, &self.kkt.nz_a, wx, wa);
        }
        let mut best_ind = None;
        let mut best_w = 0.0;
        for i in 0..self.kkt.nz {
            let wi = self.ws.w[i];
            if wi == 0.0 {
                continue;
            }
            // Removing the constraint must push the gradient the right way.
            let wrong_side = if wi > 0.0 {
                self.ws.lam[i] >= 0.0
            } else {
                self.ws.lam[i] <= 0.0
            };
            if wrong_side {
                continue;
            }
            // And must not create a larger infeasibility elsewhere.
            if self.kkt.du_check(&self.ws.infeas, &self.ws.lam, i) > self.ws.du {
                continue;
            }
            if wi.abs() > best_w {
                best_w = wi.abs();
                best_ind = Some(i);
            }
        }
        let best = best_ind?;
        self.ws
            .set_note(format_args!("Removed {} to reduce |du|", best));
        Some((best, 0))
    }

    /// Rank guard: would toggling `index` to `sign` singularize the
    /// system? If so, look for the companion flip with the largest slack
    /// that keeps the new system regular and the dual error below `e`.
    fn flip_check(&mut self, index: usize, sign: i32, e: f64) -> FlipCheck {
        // Express the incoming column in the current basis; dz is dead
        // here and serves as scratch.
        self.kkt.column(&mut self.ws.dz, index, sign != 0);
        self.qr.solve(&mut self.ws.dz, false);
        if self.ws.dz[index].abs() >= LINDEP_TOL {
            return FlipCheck::Independent;
        }
        // The outgoing column, for the independence probe below.
        self.kkt.column(&mut self.ws.w, index, sign == 0);

        let mut r_index = None;
        let mut r_sign = 0;
        let mut best_slack = f64::NEG_INFINITY;
        for i in 0..self.kkt.nz {
            if i == index {
                continue;
            }
            // The companion itself must be flippable.
            if self.ws.lam[i] == 0.0 {
                if self.ws.neverlower[i] && self.ws.neverupper[i] {
                    continue;
                }
            } else if self.ws.neverzero[i] {
                continue;
            }
            // Columns without weight in the expansion are redundant here.
            if self.ws.dz[i].abs() < LINDEP_TOL {
                continue;
            }
            // The flipped column must not be orthogonal to the outgoing
            // one, or the exchange would stay singular.
            if self
                .kkt
                .dot(&self.ws.w, i, self.ws.lam[i] == 0.0)
                .abs()
                < LINDEP_TOL
            {
                continue;
            }
            let (new_sign, new_slack);
            if self.ws.lam[i] == 0.0 {
                // Activate whichever bound is closer.
                new_sign = if self.ws.lbz[i] - self.ws.z[i] >= self.ws.z[i] - self.ws.ubz[i] {
                    -1
                } else {
                    1
                };
                new_slack = 0.0;
            } else {
                // Deactivating must keep the dual error acceptable.
                if self.kkt.du_check(&self.ws.infeas, &self.ws.lam, i) > e {
                    continue;
                }
                new_slack = if self.ws.lam[i] > 0.0 {
                    self.ws.ubz[i] - self.ws.z[i]
                } else {
                    self.ws.z[i] - self.ws.lbz[i]
                };
                new_sign = 0;
            }
            if new_slack > best_slack {
                best_slack = new_slack;
                r_index = Some(i);
                r_sign = new_sign;
            }
        }
        match r_index {
            Some(i) => FlipCheck::Companion {
                index: i,
                sign: r_sign,
            },
            None => FlipCheck::NoCompanion,
        }
    }

    /// Make the next working-set change, if any: first honor a
    /// rank-restoring hint from the previous step computation, otherwise
    /// pick a primal- or dual-improving candidate, then guard the change
    /// against singularity and apply it.
    pub(crate) fn flip(&mut self, proposal: &mut Proposal, hint: Option<(usize, i32)>) {
        let e = (self.settings.du_to_pr * self.ws.pr).max(self.ws.du);

        if let Some((r_index, r_sign)) = hint {
            if r_sign != 0
                || self.kkt.du_check(&self.ws.infeas, &self.ws.lam, r_index) <= e
            {
                *proposal = Proposal::Change {
                    index: r_index,
                    sign: r_sign,
                };
                self.ws
                    .set_note(format_args!("{} -> {} for regularity", r_index, r_sign));
            }
        }

        if *proposal == Proposal::None
            && self.ws.tau > TAU_GUARD
            && (self.ws.ipr.is_some() || self.ws.idu.is_some())
        {
            let picked = if self.settings.du_to_pr * self.ws.pr >= self.ws.du {
                self.pr_index()
            } else {
                self.du_index()
            };
            if let Some((index, sign)) = picked {
                *proposal = Proposal::Change { index, sign };
            }
        }

        if let Proposal::Change { index, sign } = *proposal {
            if self.ws.sing == 0 {
                match self.flip_check(index, sign, e) {
                    FlipCheck::Independent => {}
                    FlipCheck::Companion {
                        index: r_index,
                        sign: r_sign,
                    } => {
                        self.ws.lam[r_index] = sign_token(r_sign);
                        self.ws.set_note(format_args!(
                            "{} -> {}, {} -> {}",
                            index, sign, r_index, r_sign
                        ));
                    }
                    FlipCheck::NoCompanion => {
                        self.ws.set_note(format_args!(
                            "{} -> {}, accepting singular basis",
                            index, sign
                        ));
                    }
                }
            }
            self.ws.lam[index] = sign_token(sign);
            self.recompute();
            *proposal = Proposal::Applied;
        }
    }
}
