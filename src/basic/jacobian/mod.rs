//! Newton-Raphson Jacobian assembly.
//!
//! Columns are ordered `[Va(pv), Va(pq), Vm(pq)]` and rows `[P(pv), P(pq), Q(pq)]`.
//! Two interchangeable backends implement [`JacobianBuilder`]:
//! [`SliceJacobian`] derives the blocks from the complex `dS/dV` matrices and
//! [`PatternJacobian`] writes the columns straight from the `Ybus` pattern.

mod pattern;
mod reference;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::{
    config::JacobianKind,
    sparse::slice::{NOT_SELECTED, index_lookup},
};

pub use pattern::PatternJacobian;
pub use reference::SliceJacobian;

/// Row and column bookkeeping shared by all iterations of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianLayout {
    pub pvpq: Vec<usize>,
    pub pq: Vec<usize>,
    pvpq_lookup: Vec<usize>,
    pq_lookup: Vec<usize>,
}

impl JacobianLayout {
    /// `pv` and `pq` must be disjoint node indices below `n`.
    pub fn new(n: usize, pv: &[usize], pq: &[usize]) -> Self {
        let pvpq: Vec<usize> = pv.iter().chain(pq).copied().collect();
        let pvpq_lookup = index_lookup(&pvpq, n);
        let pq_lookup = index_lookup(pq, n);
        JacobianLayout {
            pvpq,
            pq: pq.to_vec(),
            pvpq_lookup,
            pq_lookup,
        }
    }

    /// Number of state variables.
    #[inline]
    pub fn dim(&self) -> usize {
        self.pvpq.len() + self.pq.len()
    }

    /// Jacobian rows fed by node `bus`: the `P` row and the `Q` row, if any.
    #[inline]
    fn rows_of(&self, bus: usize) -> (Option<usize>, Option<usize>) {
        let p = self.pvpq_lookup[bus];
        let q = self.pq_lookup[bus];
        (
            (p != NOT_SELECTED).then_some(p),
            (q != NOT_SELECTED).then(|| self.pvpq.len() + q),
        )
    }
}

/// Builds the real Jacobian of the power mismatch at voltage `v`.
pub trait JacobianBuilder {
    /// `d_sbus_d_vm` is the diagonal of `dSbus/dVm` for voltage-dependent
    /// injections; it is subtracted from the magnitude columns.
    fn build(
        &self,
        y_bus: &CscMatrix<Complex64>,
        v: &DVector<Complex64>,
        layout: &JacobianLayout,
        d_sbus_d_vm: Option<&DVector<Complex64>>,
    ) -> CscMatrix<f64>;
}

/// Resolves `kind` to a backend. `Auto` prefers the pattern walk when the
/// `fast-jacobian` feature is compiled in.
pub fn jacobian_backend(kind: JacobianKind) -> Box<dyn JacobianBuilder> {
    match kind {
        JacobianKind::Reference => Box::new(SliceJacobian),
        JacobianKind::Pattern => Box::new(PatternJacobian),
        JacobianKind::Auto if cfg!(feature = "fast-jacobian") => Box::new(PatternJacobian),
        JacobianKind::Auto => Box::new(SliceJacobian),
    }
}
