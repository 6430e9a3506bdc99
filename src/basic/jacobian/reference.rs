use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::{JacobianBuilder, JacobianLayout};
use crate::basic::{
    dsbus_dv::{dSbus_dV, diag},
    sparse::{
        conj::RealImage,
        slice::select_csc,
        stack::{csc_hstack, csc_vstack},
    },
};

/// Jacobian from the complex `dS/dVm`, `dS/dVa` matrices.
///
/// ```text
/// J11 = Re dS/dVa[pvpq, pvpq]   J12 = Re dS/dVm[pvpq, pq]
/// J21 = Im dS/dVa[pq, pvpq]     J22 = Im dS/dVm[pq, pq]
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SliceJacobian;

#[allow(non_snake_case)]
impl JacobianBuilder for SliceJacobian {
    fn build(
        &self,
        y_bus: &CscMatrix<Complex64>,
        v: &DVector<Complex64>,
        layout: &JacobianLayout,
        d_sbus_d_vm: Option<&DVector<Complex64>>,
    ) -> CscMatrix<f64> {
        let (mut dS_dVm, dS_dVa) = dSbus_dV(y_bus, v);
        if let Some(d) = d_sbus_d_vm {
            dS_dVm = dS_dVm - diag(d);
        }
        let (pvpq, pq) = (&layout.pvpq, &layout.pq);

        let (J11, _) = select_csc(&dS_dVa, pvpq, pvpq).real_imag();
        let (J12, _) = select_csc(&dS_dVm, pvpq, pq).real_imag();
        let (_, J21) = select_csc(&dS_dVa, pq, pvpq).real_imag();
        let (_, J22) = select_csc(&dS_dVm, pq, pq).real_imag();

        csc_vstack(&[&csc_hstack(&[&J11, &J12]), &csc_hstack(&[&J21, &J22])])
    }
}
