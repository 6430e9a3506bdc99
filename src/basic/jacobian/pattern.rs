use nalgebra::DVector;
use nalgebra_sparse::{CscMatrix, pattern::SparsityPattern};
use num_complex::Complex64;

use super::{JacobianBuilder, JacobianLayout};
use crate::basic::dsbus_dv::unit_phasor;

/// Jacobian written column by column from the `Ybus` sparsity pattern.
///
/// Column `k` of `Ybus` holds every `Y[i, k]`, which is exactly the set of
/// injections that depend on the voltage at node `k`. Diagonal entries are
/// always emitted since the current term contributes even when `Y[k, k] = 0`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternJacobian;

struct ColumnWriter<'a> {
    layout: &'a JacobianLayout,
    column: Vec<(usize, f64)>,
    offsets: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl<'a> ColumnWriter<'a> {
    fn new(layout: &'a JacobianLayout) -> Self {
        let dim = layout.dim();
        let mut offsets = Vec::with_capacity(dim + 1);
        offsets.push(0);
        ColumnWriter {
            layout,
            column: Vec::new(),
            offsets,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    #[inline]
    fn push(&mut self, bus: usize, ds: Complex64) {
        let (p, q) = self.layout.rows_of(bus);
        if let Some(p) = p {
            self.column.push((p, ds.re));
        }
        if let Some(q) = q {
            self.column.push((q, ds.im));
        }
    }

    fn finish_column(&mut self) {
        self.column.sort_unstable_by_key(|e| e.0);
        for (r, x) in self.column.drain(..) {
            self.indices.push(r);
            self.values.push(x);
        }
        self.offsets.push(self.indices.len());
    }

    fn into_matrix(self) -> CscMatrix<f64> {
        let dim = self.layout.dim();
        // every column is sorted and rows come from the layout lookups
        unsafe {
            let pattern =
                SparsityPattern::from_offset_and_indices_unchecked(dim, dim, self.offsets, self.indices);
            CscMatrix::try_from_pattern_and_values(pattern, self.values).unwrap_unchecked()
        }
    }
}

impl JacobianBuilder for PatternJacobian {
    fn build(
        &self,
        y_bus: &CscMatrix<Complex64>,
        v: &DVector<Complex64>,
        layout: &JacobianLayout,
        d_sbus_d_vm: Option<&DVector<Complex64>>,
    ) -> CscMatrix<f64> {
        let i_bus = y_bus * v;
        let j = Complex64::i();
        let mut w = ColumnWriter::new(layout);

        // dS_i/dVa_k = -j V_i conj(Y_ik V_k),  diagonal adds j V_k conj(I_k)
        for &k in &layout.pvpq {
            let col = y_bus.col(k);
            let mut diag = j * v[k] * i_bus[k].conj();
            for (&i, y) in col.row_indices().iter().zip(col.values()) {
                let ds = -j * v[i] * (y * v[k]).conj();
                if i == k {
                    diag += ds;
                } else {
                    w.push(i, ds);
                }
            }
            w.push(k, diag);
            w.finish_column();
        }

        // dS_i/dVm_k = V_i conj(Y_ik Vnorm_k),  diagonal adds conj(I_k) Vnorm_k
        for &k in &layout.pq {
            let col = y_bus.col(k);
            let v_norm = unit_phasor(v[k]);
            let mut diag = i_bus[k].conj() * v_norm;
            if let Some(d) = d_sbus_d_vm {
                diag -= d[k];
            }
            for (&i, y) in col.row_indices().iter().zip(col.values()) {
                let ds = v[i] * (y * v_norm).conj();
                if i == k {
                    diag += ds;
                } else {
                    w.push(i, ds);
                }
            }
            w.push(k, diag);
            w.finish_column();
        }

        w.into_matrix()
    }
}
