//! Sparse QR factorization backend.
//!
//! Householder QR of a square CSC matrix with a symbolic/numeric split:
//! the pattern analysis (row ordering, factor patterns, reflection
//! schedule) runs once per sparsity structure, after which numeric
//! factorizations reuse the preallocated buffers. Beyond factor/solve the
//! backend reports rank deficiency from the diagonal of R and produces
//! approximate null-space vectors by column combination, which the
//! active-set iteration needs to repair singular working sets.
//!
//! Rows are permuted so that rows with early leftmost nonzeros are
//! eliminated first; columns stay in natural order, so column indices
//! reported by [`SparseQr::singularity`] refer directly to columns of the
//! factorized matrix.

use super::sparse::CscPattern;
use thiserror::Error;

/// QR backend errors.
#[derive(Error, Debug)]
pub enum QrError {
    /// The factorization is only defined for square matrices.
    #[error("matrix must be square, got {nrows}x{ncols}")]
    NotSquare {
        /// Number of rows
        nrows: usize,
        /// Number of columns
        ncols: usize,
    },

    /// Value array does not match the analyzed pattern.
    #[error("value count mismatch: expected {expected}, got {actual}")]
    ValueMismatch {
        /// Expected nonzero count
        expected: usize,
        /// Provided nonzero count
        actual: usize,
    },
}

/// Rank report taken from the diagonal of R.
#[derive(Debug, Clone, Copy)]
pub struct Singularity {
    /// Number of diagonal entries of R below the tolerance.
    pub count: usize,
    /// Smallest |R[c,c]| over all columns.
    pub min_diag: f64,
    /// Column attaining `min_diag`.
    pub argmin: usize,
}

/// Sparse Householder QR with reusable symbolic analysis.
pub struct SparseQr {
    n: usize,
    sp: CscPattern,

    // Symbolic data
    prinv: Vec<usize>,   // permuted position -> original row
    row_pos: Vec<usize>, // original row -> permuted position
    v_colind: Vec<usize>,
    v_row: Vec<usize>,
    r_colind: Vec<usize>,
    r_row: Vec<usize>,
    rdiag: Vec<usize>, // value position of the diagonal entry per column
    apply_ptr: Vec<usize>,
    apply_ref: Vec<usize>, // reflections to apply per column

    // Numeric factors
    v_val: Vec<f64>,
    r_val: Vec<f64>,
    beta: Vec<f64>,

    // Dense scratch column
    w: Vec<f64>,
}

impl SparseQr {
    /// Analyze the pattern of a square matrix.
    ///
    /// Performs the row ordering and a structural simulation of the
    /// elimination to size the V and R factors and record, per column,
    /// which earlier reflections touch it.
    pub fn new(sp: &CscPattern) -> Result<Self, QrError> {
        if sp.nrows != sp.ncols {
            return Err(QrError::NotSquare {
                nrows: sp.nrows,
                ncols: sp.ncols,
            });
        }
        let n = sp.ncols;

        // Order rows by their leftmost nonzero column, stable in the row
        // index, so the elimination stays close to the structure.
        let mut first_col = vec![n; n];
        for c in (0..n).rev() {
            for k in sp.col_range(c) {
                first_col[sp.row[k]] = c;
            }
        }
        let mut prinv: Vec<usize> = (0..n).collect();
        prinv.sort_by_key(|&r| (first_col[r], r));
        let mut row_pos = vec![0usize; n];
        for (pos, &r) in prinv.iter().enumerate() {
            row_pos[r] = pos;
        }

        // Structural elimination: for each column, take the union of its
        // pattern with the patterns of all earlier Householder vectors that
        // intersect it. Entries above the pivot become R, the rest V.
        let mut v_colind = vec![0usize];
        let mut v_row: Vec<usize> = Vec::new();
        let mut r_colind = vec![0usize];
        let mut r_row: Vec<usize> = Vec::new();
        let mut rdiag = Vec::with_capacity(n);
        let mut apply_ptr = vec![0usize];
        let mut apply_ref: Vec<usize> = Vec::new();
        let mut mark = vec![usize::MAX; n];
        let mut pat: Vec<usize> = Vec::with_capacity(n);

        for j in 0..n {
            pat.clear();
            for k in sp.col_range(j) {
                let p = row_pos[sp.row[k]];
                mark[p] = j;
                pat.push(p);
            }
            for k in 0..j {
                let range = v_colind[k]..v_colind[k + 1];
                if v_row[range.clone()].iter().any(|&p| mark[p] == j) {
                    apply_ref.push(k);
                    for t in range {
                        let p = v_row[t];
                        if mark[p] != j {
                            mark[p] = j;
                            pat.push(p);
                        }
                    }
                }
            }
            pat.sort_unstable();
            apply_ptr.push(apply_ref.len());

            let split = pat.partition_point(|&p| p < j);
            for &p in &pat[..split] {
                r_row.push(p);
            }
            r_row.push(j);
            rdiag.push(r_row.len() - 1);
            r_colind.push(r_row.len());

            v_row.push(j);
            for &p in &pat[split..] {
                if p != j {
                    v_row.push(p);
                }
            }
            v_colind.push(v_row.len());
        }

        let nnz_v = v_row.len();
        let nnz_r = r_row.len();
        Ok(Self {
            n,
            sp: sp.clone(),
            prinv,
            row_pos,
            v_colind,
            v_row,
            r_colind,
            r_row,
            rdiag,
            apply_ptr,
            apply_ref,
            v_val: vec![0.0; nnz_v],
            r_val: vec![0.0; nnz_r],
            beta: vec![0.0; n],
            w: vec![0.0; n],
        })
    }

    /// Number of stored nonzeros in the V factor.
    pub fn nnz_v(&self) -> usize {
        self.v_row.len()
    }

    /// Number of stored nonzeros in the R factor.
    pub fn nnz_r(&self) -> usize {
        self.r_row.len()
    }

    /// Numeric factorization of the analyzed pattern with new values.
    pub fn factorize(&mut self, values: &[f64]) -> Result<(), QrError> {
        if values.len() != self.sp.nnz() {
            return Err(QrError::ValueMismatch {
                expected: self.sp.nnz(),
                actual: values.len(),
            });
        }
        let n = self.n;
        self.w.fill(0.0);

        for j in 0..n {
            // Scatter the permuted column into the dense scratch.
            for k in self.sp.col_range(j) {
                self.w[self.row_pos[self.sp.row[k]]] = values[k];
            }
            // Apply the scheduled earlier reflections.
            for a in self.apply_ptr[j]..self.apply_ptr[j + 1] {
                self.apply_house(self.apply_ref[a]);
            }
            // Householder vector annihilating the subdiagonal of column j.
            let vr = self.v_colind[j]..self.v_colind[j + 1];
            let alpha = self.w[j];
            let mut sigma = 0.0;
            for t in vr.clone().skip(1) {
                let wi = self.w[self.v_row[t]];
                sigma += wi * wi;
            }
            let rjj;
            if sigma == 0.0 {
                self.beta[j] = 0.0;
                self.v_val[vr.start] = 1.0;
                for t in vr.clone().skip(1) {
                    self.v_val[t] = 0.0;
                }
                rjj = alpha;
            } else {
                let mu = (alpha * alpha + sigma).sqrt();
                let v0 = if alpha <= 0.0 {
                    alpha - mu
                } else {
                    -sigma / (alpha + mu)
                };
                self.beta[j] = 2.0 * v0 * v0 / (sigma + v0 * v0);
                self.v_val[vr.start] = 1.0;
                let inv = 1.0 / v0;
                for t in vr.clone().skip(1) {
                    self.v_val[t] = self.w[self.v_row[t]] * inv;
                }
                rjj = mu;
            }
            // Gather R column j; the diagonal entry is stored last.
            for t in self.r_colind[j]..self.r_colind[j + 1] {
                let r = self.r_row[t];
                self.r_val[t] = if r == j { rjj } else { self.w[r] };
            }
            // Restore the scratch to zero over everything touched.
            for t in self.r_colind[j]..self.r_colind[j + 1] {
                self.w[self.r_row[t]] = 0.0;
            }
            for t in vr {
                self.w[self.v_row[t]] = 0.0;
            }
        }
        Ok(())
    }

    /// Apply reflection k to the scratch column.
    #[inline]
    fn apply_house(&mut self, k: usize) {
        let range = self.v_colind[k]..self.v_colind[k + 1];
        let mut s = 0.0;
        for t in range.clone() {
            s += self.v_val[t] * self.w[self.v_row[t]];
        }
        s *= self.beta[k];
        if s != 0.0 {
            for t in range {
                self.w[self.v_row[t]] -= s * self.v_val[t];
            }
        }
    }

    /// Solve K x = b (or K^T x = b) in place, where K is the last
    /// factorized matrix.
    pub fn solve(&mut self, x: &mut [f64], transposed: bool) {
        let n = self.n;
        debug_assert_eq!(x.len(), n);
        if !transposed {
            // K = P^T Q R: permute, multiply by Q^T, back-substitute R.
            for c in 0..n {
                self.w[c] = x[self.prinv[c]];
            }
            for k in 0..n {
                self.apply_house(k);
            }
            for c in (0..n).rev() {
                self.w[c] /= self.r_val[self.rdiag[c]];
                let wc = self.w[c];
                if wc != 0.0 {
                    for t in self.r_colind[c]..self.rdiag[c] {
                        self.w[self.r_row[t]] -= self.r_val[t] * wc;
                    }
                }
            }
            x.copy_from_slice(&self.w[..n]);
        } else {
            // K^T = R^T Q^T P: forward-substitute R^T, multiply by Q,
            // permute back.
            self.w[..n].copy_from_slice(x);
            for c in 0..n {
                let mut s = self.w[c];
                for t in self.r_colind[c]..self.rdiag[c] {
                    s -= self.r_val[t] * self.w[self.r_row[t]];
                }
                self.w[c] = s / self.r_val[self.rdiag[c]];
            }
            for k in (0..n).rev() {
                self.apply_house(k);
            }
            for c in 0..n {
                x[self.prinv[c]] = self.w[c];
            }
        }
    }

    /// Inspect the diagonal of R for rank deficiency.
    pub fn singularity(&self, eps: f64) -> Singularity {
        let mut count = 0;
        let mut min_diag = f64::INFINITY;
        let mut argmin = 0;
        for c in 0..self.n {
            let d = self.r_val[self.rdiag[c]].abs();
            if d < eps {
                count += 1;
            }
            if d < min_diag {
                min_diag = d;
                argmin = c;
            }
        }
        Singularity {
            count,
            min_diag,
            argmin,
        }
    }

    /// Write the `ind`-th approximate null-space basis vector into `out`.
    ///
    /// The basis enumerates the singular columns of R with `argmin` first,
    /// then the remaining ones in ascending order. Each vector carries a
    /// unit entry at its singular column and is completed by
    /// back-substitution through the nonsingular part of R, then normalized
    /// to unit Euclidean norm. The result satisfies `K out ≈ 0` up to the
    /// size of the skipped diagonal entries.
    pub fn nullspace_vector(&mut self, out: &mut [f64], argmin: usize, ind: usize, eps: f64) {
        let n = self.n;
        debug_assert_eq!(out.len(), n);
        let mut col = argmin;
        if ind > 0 {
            let mut seen = 0;
            for c in 0..n {
                if c == argmin {
                    continue;
                }
                if self.r_val[self.rdiag[c]].abs() < eps {
                    seen += 1;
                    if seen == ind {
                        col = c;
                        break;
                    }
                }
            }
        }

        self.w.fill(0.0);
        out.fill(0.0);
        out[col] = 1.0;
        // Accumulate R[:, c] y[c] contributions while substituting upward.
        for t in self.r_colind[col]..self.rdiag[col] {
            self.w[self.r_row[t]] = self.r_val[t];
        }
        for r in (0..col).rev() {
            let d = self.r_val[self.rdiag[r]];
            if d.abs() < eps {
                continue;
            }
            let y = -self.w[r] / d;
            out[r] = y;
            if y != 0.0 {
                for t in self.r_colind[r]..self.rdiag[r] {
                    self.w[self.r_row[t]] += self.r_val[t] * y;
                }
            }
        }
        for r in 0..col {
            self.w[r] = 0.0;
        }

        let norm = out.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in out.iter_mut() {
                *v /= norm;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::{from_triplets, mv, CscPattern};

    fn dense_residual(sp: &CscPattern, val: &[f64], x: &[f64], b: &[f64]) -> f64 {
        let mut ax = vec![0.0; sp.nrows];
        mv(sp, val, x, &mut ax);
        ax.iter()
            .zip(b.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_factor_solve() {
        // Unsymmetric, structurally irregular 4x4.
        let mat = from_triplets(
            4,
            4,
            vec![
                (0, 0, 4.0),
                (1, 0, 1.0),
                (1, 1, 3.0),
                (2, 2, 2.0),
                (0, 2, -1.0),
                (3, 1, 1.0),
                (3, 3, 5.0),
                (2, 3, 1.0),
            ],
        );
        let sp = CscPattern::from_mat(&mat);
        let mut qr = SparseQr::new(&sp).unwrap();
        qr.factorize(mat.data()).unwrap();

        let sing = qr.singularity(1e-12);
        assert_eq!(sing.count, 0);
        assert!(sing.min_diag > 0.1);

        let b = vec![1.0, -2.0, 3.0, 0.5];
        let mut x = b.clone();
        qr.solve(&mut x, false);
        assert!(dense_residual(&sp, mat.data(), &x, &b) < 1e-10);

        // Transposed solve: check K^T x = b by forming K^T explicitly.
        let mut xt = b.clone();
        qr.solve(&mut xt, true);
        let tmat = from_triplets(
            4,
            4,
            vec![
                (0, 0, 4.0),
                (0, 1, 1.0),
                (1, 1, 3.0),
                (2, 2, 2.0),
                (2, 0, -1.0),
                (1, 3, 1.0),
                (3, 3, 5.0),
                (3, 2, 1.0),
            ],
        );
        let sp_t = CscPattern::from_mat(&tmat);
        assert!(dense_residual(&sp_t, tmat.data(), &xt, &b) < 1e-10);
    }

    #[test]
    fn test_refactorize_same_pattern() {
        let mat = from_triplets(2, 2, vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 4.0)]);
        let sp = CscPattern::from_mat(&mat);
        let mut qr = SparseQr::new(&sp).unwrap();
        qr.factorize(mat.data()).unwrap();

        // New values, same structure.
        qr.factorize(&[2.0, 1.0, 1.0, 2.0]).unwrap();
        let b = vec![3.0, 3.0];
        let mut x = b.clone();
        qr.solve(&mut x, false);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_detection_and_nullspace() {
        // Rank-2 matrix: third column = first + second.
        let mat = from_triplets(
            3,
            3,
            vec![
                (0, 0, 1.0),
                (1, 0, 2.0),
                (0, 1, 3.0),
                (2, 1, 1.0),
                (0, 2, 4.0),
                (1, 2, 2.0),
                (2, 2, 1.0),
            ],
        );
        let sp = CscPattern::from_mat(&mat);
        let mut qr = SparseQr::new(&sp).unwrap();
        qr.factorize(mat.data()).unwrap();

        let sing = qr.singularity(1e-12);
        assert_eq!(sing.count, 1);
        assert!(sing.min_diag < 1e-12);

        let mut v = vec![0.0; 3];
        qr.nullspace_vector(&mut v, sing.argmin, 0, 1e-12);
        let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
        let mut kv = vec![0.0; 3];
        mv(&sp, mat.data(), &v, &mut kv);
        assert!(kv.iter().all(|x| x.abs() < 1e-9), "K v = {:?}", kv);
    }
}
