use nalgebra::Scalar;
use nalgebra_sparse::{CscMatrix, pattern::SparsityPattern};

pub const NOT_SELECTED: usize = usize::MAX;

/// Position of every original index inside `selection`, `NOT_SELECTED` elsewhere.
#[inline]
pub fn index_lookup(selection: &[usize], dim: usize) -> Vec<usize> {
    let mut lookup = vec![NOT_SELECTED; dim];
    for (pos, &idx) in selection.iter().enumerate() {
        lookup[idx] = pos;
    }
    lookup
}

/// Extracts `mat[rows, cols]`, keeping the order of both index sets.
///
/// Indices must be in range and free of duplicates.
pub fn select_csc<T: Scalar>(mat: &CscMatrix<T>, rows: &[usize], cols: &[usize]) -> CscMatrix<T> {
    let row_lookup = index_lookup(rows, mat.nrows());
    let mut offsets = Vec::with_capacity(cols.len() + 1);
    let mut indices = Vec::new();
    let mut values = Vec::new();
    offsets.push(0);
    for &c in cols {
        let col = mat.col(c);
        let mut entries: Vec<(usize, T)> = col
            .row_indices()
            .iter()
            .zip(col.values())
            .filter_map(|(&r, v)| {
                let pos = row_lookup[r];
                (pos != NOT_SELECTED).then(|| (pos, v.clone()))
            })
            .collect();
        entries.sort_unstable_by_key(|e| e.0);
        for (r, v) in entries {
            indices.push(r);
            values.push(v);
        }
        offsets.push(indices.len());
    }
    // offsets and indices are built sorted and in range
    unsafe {
        let pattern =
            SparsityPattern::from_offset_and_indices_unchecked(cols.len(), rows.len(), offsets, indices);
        CscMatrix::try_from_pattern_and_values(pattern, values).unwrap_unchecked()
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::DMatrix;
    use nalgebra_sparse::CooMatrix;

    use super::*;

    #[test]
    fn test_select_reorders_rows_and_cols() {
        let mut coo = CooMatrix::new(4, 4);
        for r in 0..4 {
            for c in 0..4 {
                if (r + c) % 2 == 0 {
                    coo.push(r, c, (10 * r + c) as f64);
                }
            }
        }
        let a = CscMatrix::from(&coo);
        let dense = DMatrix::from(&a);

        let rows = [3, 0, 2];
        let cols = [2, 1];
        let s = DMatrix::from(&select_csc(&a, &rows, &cols));
        assert_eq!(s.shape(), (3, 2));
        for (i, &r) in rows.iter().enumerate() {
            for (j, &c) in cols.iter().enumerate() {
                assert_eq!(s[(i, j)], dense[(r, c)]);
            }
        }
    }

    #[test]
    fn test_empty_selection() {
        let a: CscMatrix<f64> = CscMatrix::identity(3);
        let s = select_csc(&a, &[], &[0, 1]);
        assert_eq!((s.nrows(), s.ncols(), s.nnz()), (0, 2, 0));
    }
}
