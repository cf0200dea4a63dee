//! Sparse matrix helpers in CSC (Compressed Sparse Column) format.
//!
//! Problem matrices enter and leave through `sprs`. Internally the solver
//! kernels work on flat pattern triples (`ncol`, `colind`, `row`) plus
//! separate value slices, so the iteration can overwrite values in place
//! without touching any matrix object and without allocating.

use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format.
pub type SparseCsc = CsMat<f64>;

/// Build a sparse CSC matrix from (row, col, value) triplets.
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// Owned CSC sparsity pattern, structure only.
///
/// Row indices are sorted within each column, as produced by `sprs`.
#[derive(Debug, Clone)]
pub struct CscPattern {
    pub nrows: usize,
    pub ncols: usize,
    pub colind: Vec<usize>,
    pub row: Vec<usize>,
}

impl CscPattern {
    /// Extract the pattern of a CSC matrix.
    pub fn from_mat(mat: &SparseCsc) -> Self {
        debug_assert!(mat.is_csc());
        let indptr = mat.indptr();
        Self {
            nrows: mat.rows(),
            ncols: mat.cols(),
            colind: indptr.raw_storage().to_vec(),
            row: mat.indices().to_vec(),
        }
    }

    pub fn nnz(&self) -> usize {
        self.colind[self.ncols]
    }

    /// Range of value positions for one column.
    #[inline]
    pub fn col_range(&self, c: usize) -> std::ops::Range<usize> {
        self.colind[c]..self.colind[c + 1]
    }
}

/// y += A x for A in pattern `sp` with values `val`.
pub fn mv(sp: &CscPattern, val: &[f64], x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), sp.ncols);
    debug_assert_eq!(y.len(), sp.nrows);
    for c in 0..sp.ncols {
        let xc = x[c];
        if xc != 0.0 {
            for k in sp.col_range(c) {
                y[sp.row[k]] += val[k] * xc;
            }
        }
    }
}

/// y += A^T x for A in pattern `sp` with values `val`.
pub fn mv_t(sp: &CscPattern, val: &[f64], x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), sp.nrows);
    debug_assert_eq!(y.len(), sp.ncols);
    for c in 0..sp.ncols {
        let mut sum = 0.0;
        for k in sp.col_range(c) {
            sum += val[k] * x[sp.row[k]];
        }
        y[c] += sum;
    }
}

/// Bilinear form x^T A y.
pub fn bilin(sp: &CscPattern, val: &[f64], x: &[f64], y: &[f64]) -> f64 {
    let mut sum = 0.0;
    for c in 0..sp.ncols {
        let yc = y[c];
        if yc != 0.0 {
            for k in sp.col_range(c) {
                sum += x[sp.row[k]] * val[k] * yc;
            }
        }
    }
    sum
}

/// Pattern of A^T plus a gather map from A values to A^T values:
/// `at_val[k] = val[map[k]]`.
pub fn transpose_pattern(sp: &CscPattern) -> (CscPattern, Vec<usize>) {
    let nnz = sp.nnz();
    let mut colind = vec![0usize; sp.nrows + 1];
    // Count entries per row of A (= per column of A^T).
    for &r in &sp.row {
        colind[r + 1] += 1;
    }
    for r in 0..sp.nrows {
        colind[r + 1] += colind[r];
    }
    let mut cursor = colind[..sp.nrows].to_vec();
    let mut row = vec![0usize; nnz];
    let mut map = vec![0usize; nnz];
    for c in 0..sp.ncols {
        for k in sp.col_range(c) {
            let pos = cursor[sp.row[k]];
            cursor[sp.row[k]] += 1;
            row[pos] = c;
            map[pos] = k;
        }
    }
    (
        CscPattern {
            nrows: sp.ncols,
            ncols: sp.nrows,
            colind,
            row,
        },
        map,
    )
}

/// dst[k] = src[map[k]] for a gather map produced by [`transpose_pattern`].
pub fn gather(map: &[usize], src: &[f64], dst: &mut [f64]) {
    for (d, &k) in dst.iter_mut().zip(map.iter()) {
        *d = src[k];
    }
}

/// Assemble the sparsity of the combined stationarity system
///
/// ```text
/// [ H | A^T ]
/// [ A |  D  ]
/// ```
///
/// with the diagonal forced present in both diagonal blocks, so that rows
/// whose bound or constraint is inactive can collapse to unit rows without
/// changing the structure. For a structurally symmetric H the result is
/// structurally symmetric as well.
pub fn kkt_pattern(sp_h: &CscPattern, sp_a: &CscPattern, sp_at: &CscPattern) -> CscPattern {
    let n = sp_h.ncols;
    let m = sp_a.nrows;
    debug_assert_eq!(sp_h.nrows, n);
    debug_assert_eq!(sp_a.ncols, n);
    debug_assert_eq!(sp_at.ncols, m);
    let nz = n + m;

    let mut colind = Vec::with_capacity(nz + 1);
    let mut row = Vec::new();
    colind.push(0);
    // Variable columns: H column with the diagonal inserted, then the A
    // column shifted below the H block.
    for c in 0..n {
        let mut have_diag = false;
        for k in sp_h.col_range(c) {
            let r = sp_h.row[k];
            if !have_diag && r >= c {
                if r > c {
                    row.push(c);
                }
                have_diag = true;
            }
            row.push(r);
        }
        if !have_diag {
            row.push(c);
        }
        for k in sp_a.col_range(c) {
            row.push(n + sp_a.row[k]);
        }
        colind.push(row.len());
    }
    // Constraint columns: A^T column, then the diagonal entry.
    for c in 0..m {
        for k in sp_at.col_range(c) {
            row.push(sp_at.row[k]);
        }
        row.push(n + c);
        colind.push(row.len());
    }

    CscPattern {
        nrows: nz,
        ncols: nz,
        colind,
        row,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mv_and_transpose() {
        // A = [[1, 2], [3, 4], [0, 5]]
        let a = from_triplets(
            3,
            2,
            vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 4.0), (2, 1, 5.0)],
        );
        let sp = CscPattern::from_mat(&a);
        let val = a.data();

        let x = [1.0, -1.0];
        let mut y = [0.0; 3];
        mv(&sp, val, &x, &mut y);
        assert_eq!(y, [-1.0, -1.0, -5.0]);

        let w = [1.0, 1.0, 1.0];
        let mut z = [0.0; 2];
        mv_t(&sp, val, &w, &mut z);
        assert_eq!(z, [4.0, 11.0]);

        let (sp_at, map) = transpose_pattern(&sp);
        assert_eq!(sp_at.nrows, 2);
        assert_eq!(sp_at.ncols, 3);
        let mut at_val = vec![0.0; sp.nnz()];
        gather(&map, val, &mut at_val);
        // Column 1 of A^T is row 1 of A = [3, 4].
        let r = sp_at.col_range(1);
        assert_eq!(&sp_at.row[r.clone()], &[0, 1]);
        assert_eq!(&at_val[r], &[3.0, 4.0]);
    }

    #[test]
    fn test_bilin() {
        // H = [[2, 1], [1, 2]]
        let h = from_triplets(2, 2, vec![(0, 0, 2.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 2.0)]);
        let sp = CscPattern::from_mat(&h);
        let x = [1.0, 2.0];
        // x^T H x = 2 + 2 + 2 + 8 = 14
        assert!((bilin(&sp, h.data(), &x, &x) - 14.0).abs() < 1e-14);
    }

    #[test]
    fn test_kkt_pattern_symmetric() {
        // H carries only an off-diagonal pair, so both diagonals are filled in.
        let h = from_triplets(2, 2, vec![(0, 1, 1.0), (1, 0, 1.0)]);
        let a = from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]);
        let sp_h = CscPattern::from_mat(&h);
        let sp_a = CscPattern::from_mat(&a);
        let (sp_at, _) = transpose_pattern(&sp_a);
        let kkt = kkt_pattern(&sp_h, &sp_a, &sp_at);

        assert_eq!(kkt.nrows, 3);
        assert_eq!(kkt.ncols, 3);
        // Diagonal must be present in every column.
        for c in 0..3 {
            assert!(kkt.row[kkt.col_range(c)].contains(&c));
        }
        // Structural symmetry: the transpose has the identical pattern.
        let (kkt_t, _) = transpose_pattern(&kkt);
        assert_eq!(kkt.colind, kkt_t.colind);
        assert_eq!(kkt.row, kkt_t.row);
    }
}
