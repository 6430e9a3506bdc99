use nalgebra_sparse::{CscMatrix, pattern::SparsityPattern};

/// Concatenates CSC matrices side by side. All inputs must have the same row count.
pub fn csc_hstack<T: Clone>(matrices: &[&CscMatrix<T>]) -> CscMatrix<T> {
    let nrows = matrices.first().map_or(0, |m| m.nrows());
    let ncols: usize = matrices.iter().map(|m| m.ncols()).sum();
    let nnz: usize = matrices.iter().map(|m| m.nnz()).sum();

    let mut data: Vec<T> = Vec::with_capacity(nnz);
    let mut indices: Vec<usize> = Vec::with_capacity(nnz);
    let mut indptr: Vec<usize> = Vec::with_capacity(ncols + 1);
    for mat in matrices {
        assert_eq!(mat.nrows(), nrows, "All matrices must have the same number of rows");
        let offset = data.len();
        let offsets = mat.col_offsets();
        indptr.extend(offsets[..mat.ncols()].iter().map(|x| x + offset));
        indices.extend_from_slice(mat.row_indices());
        data.extend_from_slice(mat.values());
    }
    indptr.push(data.len());
    unsafe {
        let pattern = SparsityPattern::from_offset_and_indices_unchecked(ncols, nrows, indptr, indices);
        CscMatrix::try_from_pattern_and_values(pattern, data).unwrap_unchecked()
    }
}

/// Concatenates CSC matrices top to bottom. All inputs must have the same column count.
pub fn csc_vstack<T: Clone>(matrices: &[&CscMatrix<T>]) -> CscMatrix<T> {
    let ncols = matrices.first().map_or(0, |m| m.ncols());
    let nrows: usize = matrices.iter().map(|m| m.nrows()).sum();
    let nnz: usize = matrices.iter().map(|m| m.nnz()).sum();
    for mat in matrices {
        assert_eq!(mat.ncols(), ncols, "All matrices must have the same number of cols");
    }

    let mut data: Vec<T> = Vec::with_capacity(nnz);
    let mut indices: Vec<usize> = Vec::with_capacity(nnz);
    let mut indptr: Vec<usize> = Vec::with_capacity(ncols + 1);
    indptr.push(0);
    for c in 0..ncols {
        let mut row_offset = 0;
        for mat in matrices {
            let col = mat.col(c);
            data.extend_from_slice(col.values());
            indices.extend(col.row_indices().iter().map(|r| r + row_offset));
            row_offset += mat.nrows();
        }
        indptr.push(data.len());
    }
    unsafe {
        let pattern = SparsityPattern::from_offset_and_indices_unchecked(ncols, nrows, indptr, indices);
        CscMatrix::try_from_pattern_and_values(pattern, data).unwrap_unchecked()
    }
}
