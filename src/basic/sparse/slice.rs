use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Extracts the submatrix at the given rows and columns, in the given order.
pub fn select_csc(mat: &CscMatrix<f64>, rows: &[usize], cols: &[usize]) -> CscMatrix<f64> {
    let mut row_map = vec![usize::MAX; mat.nrows()];
    for (new, &old) in rows.iter().enumerate() {
        row_map[old] = new;
    }
    let mut coo = CooMatrix::new(rows.len(), cols.len());
    for (new_c, &c) in cols.iter().enumerate() {
        let col = mat.col(c);
        for (&r, &v) in col.row_indices().iter().zip(col.values()) {
            let new_r = row_map[r];
            if new_r != usize::MAX {
                coo.push(new_r, new_c, v);
            }
        }
    }
    CscMatrix::from(&coo)
}

/// Places `value` on every structurally missing or zero diagonal entry.
/// Returns the indices that were patched.
pub fn patch_zero_diagonal(mat: &CscMatrix<f64>, value: f64) -> (CscMatrix<f64>, Vec<usize>) {
    let n = mat.nrows().min(mat.ncols());
    let mut coo = CooMatrix::new(mat.nrows(), mat.ncols());
    let mut diag = vec![0.0; n];
    for (r, c, &v) in mat.triplet_iter() {
        if r == c {
            diag[r] += v;
        } else {
            coo.push(r, c, v);
        }
    }
    let mut patched = Vec::new();
    for (i, d) in diag.iter().enumerate() {
        if *d == 0.0 {
            coo.push(i, i, value);
            patched.push(i);
        } else {
            coo.push(i, i, *d);
        }
    }
    (CscMatrix::from(&coo), patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CscMatrix<f64> {
        // [[1, 0, 2],
        //  [0, 0, 3],
        //  [4, 5, 0]]
        let mut coo = CooMatrix::new(3, 3);
        coo.push(0, 0, 1.0);
        coo.push(0, 2, 2.0);
        coo.push(1, 2, 3.0);
        coo.push(2, 0, 4.0);
        coo.push(2, 1, 5.0);
        CscMatrix::from(&coo)
    }

    #[test]
    fn select_reorders() {
        let sub = select_csc(&sample(), &[2, 0], &[0, 2]);
        let dense: Vec<_> = sub.triplet_iter().map(|(r, c, v)| (r, c, *v)).collect();
        assert_eq!(dense, vec![(0, 0, 4.0), (1, 0, 1.0), (1, 1, 2.0)]);
    }

    #[test]
    fn zero_diagonal_is_patched() {
        let (m, patched) = patch_zero_diagonal(&sample(), 1.0);
        assert_eq!(patched, vec![1, 2]);
        assert_eq!(m.nnz(), 7);
        let diag: Vec<_> = m
            .triplet_iter()
            .filter(|(r, c, _)| r == c)
            .map(|(_, _, v)| *v)
            .collect();
        assert_eq!(diag, vec![1.0, 1.0, 1.0]);
    }
}
