use crate::basic::sparse::conj::Conjugate;
use nalgebra::*;
use nalgebra_sparse::CscMatrix;

/// `z / |z|`, zero for a zero phasor.
#[inline]
pub(crate) fn unit_phasor(z: Complex<f64>) -> Complex<f64> {
    let m = z.norm();
    if m > 0.0 { z / m } else { Complex::new(0.0, 0.0) }
}

/// Sparse diagonal matrix holding `values`.
pub(crate) fn diag(values: &DVector<Complex<f64>>) -> CscMatrix<Complex<f64>> {
    let mut d = CscMatrix::identity(values.len());
    d.values_mut().copy_from_slice(values.as_slice());
    d
}

/// Partial derivatives of the complex bus injections with respect to voltage
/// magnitudes and angles.
///
/// Returns `(dS_dVm, dS_dVa)` with
///
/// * `dS_dVm = diag(V) * conj(Ybus * diag(Vnorm)) + conj(diag(Ibus)) * diag(Vnorm)`
/// * `dS_dVa = j * diag(V) * conj(diag(Ibus) - Ybus * diag(V))`
///
/// where `Ibus = Ybus * V` and `Vnorm = V / |V|`.
///
/// This method is from MatPower:
///  R. D. Zimmerman, "AC Power Flows, Generalized OPF Costs and
///  their Derivatives using Complex Matrix Notation", MATPOWER
///  Technical Note 2, February 2010.
#[allow(non_snake_case)]
pub fn dSbus_dV(
    Ybus: &CscMatrix<Complex<f64>>,
    v: &DVector<Complex<f64>>,
) -> (CscMatrix<Complex<f64>>, CscMatrix<Complex<f64>>) {
    let v_norm = v.map(unit_phasor);
    let ibus = Ybus * v;
    let diagV = diag(v);
    let diagVnorm = diag(&v_norm);
    let diagIbus = diag(&ibus);

    let dS_dVm = &diagV * (Ybus * &diagVnorm).conjugate() + diagIbus.conjugate() * &diagVnorm;
    let dS_dVa = &diagV * (diagIbus - Ybus * &diagV).conjugate() * Complex::<f64>::i();
    (dS_dVm, dS_dVa)
}
