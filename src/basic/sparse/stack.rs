use nalgebra_sparse::{CscMatrix, pattern::SparsityPattern};

use crate::basic::error::{DaeError, Result};

/// Concatenates CSC matrices with equal row counts side by side.
pub fn csc_hstack(matrices: &[&CscMatrix<f64>]) -> Result<CscMatrix<f64>> {
    let Some(first) = matrices.first() else {
        return Ok(CscMatrix::zeros(0, 0));
    };
    let nrows = first.nrows();
    let mut ncols = 0;
    let mut nnz = 0;
    for mat in matrices {
        if mat.nrows() != nrows {
            return Err(DaeError::Sparse(format!(
                "hstack row mismatch: {} vs {}",
                mat.nrows(),
                nrows
            )));
        }
        ncols += mat.ncols();
        nnz += mat.nnz();
    }

    let mut values = Vec::with_capacity(nnz);
    let mut indices = Vec::with_capacity(nnz);
    let mut offsets = Vec::with_capacity(ncols + 1);
    let mut shift = 0;
    for mat in matrices {
        offsets.extend(mat.col_offsets()[..mat.ncols()].iter().map(|x| x + shift));
        indices.extend_from_slice(mat.row_indices());
        values.extend_from_slice(mat.values());
        shift += mat.nnz();
    }
    offsets.push(nnz);
    build(nrows, ncols, offsets, indices, values)
}

/// Stacks CSC matrices with equal column counts on top of each other.
pub fn csc_vstack(matrices: &[&CscMatrix<f64>]) -> Result<CscMatrix<f64>> {
    let Some(first) = matrices.first() else {
        return Ok(CscMatrix::zeros(0, 0));
    };
    let ncols = first.ncols();
    let mut nrows = 0;
    let mut nnz = 0;
    for mat in matrices {
        if mat.ncols() != ncols {
            return Err(DaeError::Sparse(format!(
                "vstack column mismatch: {} vs {}",
                mat.ncols(),
                ncols
            )));
        }
        nrows += mat.nrows();
        nnz += mat.nnz();
    }

    let mut values = Vec::with_capacity(nnz);
    let mut indices = Vec::with_capacity(nnz);
    let mut offsets = vec![0; ncols + 1];
    for j in 0..ncols {
        let mut row_shift = 0;
        for mat in matrices {
            let (start, end) = (mat.col_offsets()[j], mat.col_offsets()[j + 1]);
            values.extend_from_slice(&mat.values()[start..end]);
            indices.extend(mat.row_indices()[start..end].iter().map(|r| r + row_shift));
            row_shift += mat.nrows();
        }
        offsets[j + 1] = values.len();
    }
    build(nrows, ncols, offsets, indices, values)
}

fn build(
    nrows: usize,
    ncols: usize,
    offsets: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
) -> Result<CscMatrix<f64>> {
    let pattern = SparsityPattern::try_from_offsets_and_indices(ncols, nrows, offsets, indices)
        .map_err(|e| DaeError::Sparse(e.to_string()))?;
    CscMatrix::try_from_pattern_and_values(pattern, values)
        .map_err(|e| DaeError::Sparse(e.to_string()))
}
