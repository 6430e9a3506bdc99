use super::{
    error::{PowerFlowError, Result},
    injection::SBus,
    iwamoto::iwamoto_multiplier,
    jacobian::{JacobianBuilder, JacobianLayout},
    solver::Solve,
};

use nalgebra::*;
use nalgebra_sparse::*;
use num_complex::Complex64;

/// Iteration controls of [`newton_pf`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonOptions {
    /// Convergence threshold on the infinity norm of the mismatch, in p.u.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Scale each step with the Iwamoto multiplier.
    pub use_acceleration: bool,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        NewtonOptions {
            tolerance: 1e-5,
            max_iterations: 10,
            use_acceleration: false,
        }
    }
}

/// Terminal state of a Newton-Raphson run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfState {
    Converged,
    /// The mismatch became non-finite.
    Diverged,
    MaxIterReached,
}

/// Outcome of [`newton_pf`].
#[derive(Debug, Clone)]
pub struct NewtonResult {
    pub v: DVector<Complex64>,
    pub converged: bool,
    pub iterations: usize,
    /// Infinity norm of the last mismatch vector.
    pub residual: f64,
    pub state: PfState,
    /// Injection at the final voltage magnitudes.
    pub s_bus: DVector<Complex64>,
    /// Jacobian of the last iteration, `None` if no step was taken.
    pub jacobian: Option<CscMatrix<f64>>,
}

fn check_inputs(
    y_bus: &CscMatrix<Complex64>,
    s_bus: &dyn SBus,
    v0: &DVector<Complex64>,
    pv: &[usize],
    pq: &[usize],
) -> Result<()> {
    let n = y_bus.nrows();
    let mismatch = |what, expected, found| PowerFlowError::DimensionMismatch {
        what,
        expected,
        found,
    };
    if y_bus.ncols() != n {
        return Err(mismatch("Ybus columns", n, y_bus.ncols()));
    }
    if s_bus.len() != n {
        return Err(mismatch("Sbus", n, s_bus.len()));
    }
    if v0.len() != n {
        return Err(mismatch("V0", n, v0.len()));
    }
    let mut seen = vec![false; n];
    for (name, set) in [("pv", pv), ("pq", pq)] {
        for &k in set {
            if k >= n {
                return Err(PowerFlowError::InvalidIndexSet(format!(
                    "{name} index {k} out of range for {n} buses"
                )));
            }
            if std::mem::replace(&mut seen[k], true) {
                return Err(PowerFlowError::InvalidIndexSet(format!(
                    "bus {k} listed more than once in pv/pq"
                )));
            }
        }
    }
    Ok(())
}

/// Infinity norm, `INFINITY` as soon as an entry is not finite.
#[inline]
fn inf_norm(f: &DVector<f64>) -> f64 {
    f.iter()
        .try_fold(0.0_f64, |m, x| x.is_finite().then(|| m.max(x.abs())))
        .unwrap_or(f64::INFINITY)
}

/// `F = [Re mis[pv], Re mis[pq], Im mis[pq]]` with `mis = V conj(Ybus V) - Sbus`.
#[allow(non_snake_case)]
fn evaluate_f(
    y_bus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    s_bus: &DVector<Complex64>,
    layout: &JacobianLayout,
) -> DVector<f64> {
    let mis = v.component_mul(&(y_bus * v).conjugate()) - s_bus;
    let npvpq = layout.pvpq.len();
    DVector::from_fn(layout.dim(), |r, _| {
        if r < npvpq {
            mis[layout.pvpq[r]].re
        } else {
            mis[layout.pq[r - npvpq]].im
        }
    })
}

/// Solves the AC power flow with a full Newton-Raphson method in polar
/// coordinates.
///
/// `pv` and `pq` list the nodes whose state is solved for; every other node
/// (reference, isolated) keeps its entry of `v0`. Voltage magnitudes of `pv`
/// nodes and the reference angle are therefore fixed by `v0`.
///
/// Returns an error for inconsistent shapes or a singular Jacobian.
/// Running out of iterations is reported through [`NewtonResult::state`].
#[allow(clippy::too_many_arguments)]
pub fn newton_pf<Solver: Solve>(
    y_bus: &CscMatrix<Complex64>,
    s_bus: &dyn SBus,
    v0: &DVector<Complex64>,
    pv: &[usize],
    pq: &[usize],
    options: &NewtonOptions,
    jacobian: &dyn JacobianBuilder,
    solver: &mut Solver,
) -> Result<NewtonResult> {
    check_inputs(y_bus, s_bus, v0, pv, pq)?;
    solver.reset();

    let n = v0.len();
    let layout = JacobianLayout::new(n, pv, pq);
    let npvpq = layout.pvpq.len();
    let dim = layout.dim();

    let mut v = v0.clone();
    let mut vm = v.map(|e| e.norm());
    let mut va = v.map(|e| e.arg());
    let mut sbus = s_bus.s_bus(&vm);
    let mut f = evaluate_f(y_bus, &v, &sbus, &layout);
    let mut residual = inf_norm(&f);
    let mut last_jacobian = None;
    let mut iterations = 0;

    let mut state = if !residual.is_finite() {
        PfState::Diverged
    } else if residual < options.tolerance {
        PfState::Converged
    } else {
        PfState::MaxIterReached
    };

    while state == PfState::MaxIterReached && iterations < options.max_iterations {
        iterations += 1;

        let d_sbus = s_bus.d_sbus_d_vm(&vm);
        let jac = jacobian.build(y_bus, &v, &layout, d_sbus.as_ref());

        let mut dx = -&f;
        let (mut ap, mut ai, mut ax) = jac.clone().disassemble();
        solver
            .solve(&mut ap, &mut ai, &mut ax, dx.as_mut_slice(), dim)
            .map_err(|e| PowerFlowError::SingularJacobian {
                iteration: iterations,
                reason: e.to_string(),
            })?;
        if dx.iter().any(|x| !x.is_finite()) {
            return Err(PowerFlowError::SingularJacobian {
                iteration: iterations,
                reason: "non-finite increment".into(),
            });
        }

        let mu = if options.use_acceleration {
            // dV = dVm * exp(j dVa), zero wherever the magnitude is fixed
            let mut dv = DVector::zeros(n);
            for (r, &k) in layout.pq.iter().enumerate() {
                dv[k] = Complex64::from_polar(dx[npvpq + r], dx[pv.len() + r]);
            }
            let jac_dv = jacobian.build(y_bus, &dv, &layout, None);
            iwamoto_multiplier(&f, &jac, &jac_dv, &dx)
        } else {
            1.0
        };

        for (r, &k) in layout.pvpq.iter().enumerate() {
            va[k] += mu * dx[r];
        }
        for (r, &k) in layout.pq.iter().enumerate() {
            vm[k] += mu * dx[npvpq + r];
        }
        // a negative magnitude folds into the angle here
        for &k in &layout.pvpq {
            v[k] = Complex64::from_polar(vm[k], va[k]);
            vm[k] = v[k].norm();
            va[k] = v[k].arg();
        }

        if s_bus.voltage_dependent() {
            sbus = s_bus.s_bus(&vm);
        }
        f = evaluate_f(y_bus, &v, &sbus, &layout);
        residual = inf_norm(&f);
        last_jacobian = Some(jac);
        log::debug!("newton iteration {iterations}: |F|inf = {residual:.3e}, mu = {mu:.4}");

        if !residual.is_finite() {
            state = PfState::Diverged;
        } else if residual < options.tolerance {
            state = PfState::Converged;
        }
    }

    match state {
        PfState::Converged => log::debug!("power flow converged after {iterations} iterations"),
        PfState::Diverged => log::warn!("power flow diverged at iteration {iterations}"),
        PfState::MaxIterReached => log::warn!(
            "power flow did not converge in {iterations} iterations, |F|inf = {residual:.3e}"
        ),
    }

    Ok(NewtonResult {
        v,
        converged: state == PfState::Converged,
        iterations,
        residual,
        state,
        s_bus: sbus,
        jacobian: last_jacobian,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra_sparse::CooMatrix;

    use super::*;
    use crate::basic::{
        injection::ZipInjection,
        jacobian::{PatternJacobian, SliceJacobian},
        solver::DefaultSolver,
    };

    /// Ybus of a chain `0 - 1 - 2 - ...` with identical series impedances.
    fn chain_ybus(n: usize, z: Complex64, b_half: f64) -> CscMatrix<Complex64> {
        let y = Complex64::new(1.0, 0.0) / z;
        let mut coo = CooMatrix::new(n, n);
        for k in 1..n {
            coo.push(k - 1, k - 1, y + Complex64::new(0.0, b_half));
            coo.push(k, k, y + Complex64::new(0.0, b_half));
            coo.push(k - 1, k, -y);
            coo.push(k, k - 1, -y);
        }
        CscMatrix::from(&coo)
    }

    fn flat(n: usize) -> DVector<Complex64> {
        DVector::from_element(n, Complex64::new(1.0, 0.0))
    }

    fn options(tolerance: f64) -> NewtonOptions {
        NewtonOptions {
            tolerance,
            max_iterations: 10,
            use_acceleration: false,
        }
    }

    /// Radial 3-bus case whose injections are generated from a chosen voltage
    /// profile, so the solution is known.
    fn three_bus() -> (CscMatrix<Complex64>, DVector<Complex64>, DVector<Complex64>) {
        let y = chain_ybus(3, Complex64::new(0.01, 0.05), 0.01);
        let v_true = DVector::from_vec(vec![
            Complex64::from_polar(1.0, 0.0),
            Complex64::from_polar(0.97, -0.03),
            Complex64::from_polar(0.95, -0.05),
        ]);
        let s = v_true.component_mul(&(&y * &v_true).conjugate());
        (y, v_true, s)
    }

    #[test]
    fn test_three_bus_radial_known_solution() {
        let (y, v_true, s) = three_bus();
        for backend in [&SliceJacobian as &dyn JacobianBuilder, &PatternJacobian] {
            let res = newton_pf(
                &y,
                &s,
                &flat(3),
                &[],
                &[1, 2],
                &options(1e-10),
                backend,
                &mut DefaultSolver::default(),
            )
            .unwrap();
            assert!(res.converged);
            assert_eq!(res.state, PfState::Converged);
            assert!(res.iterations <= 10);
            assert!(res.residual < 1e-10);
            for k in 0..3 {
                assert_relative_eq!(res.v[k].norm(), v_true[k].norm(), epsilon = 1e-6);
                assert_relative_eq!(res.v[k].arg(), v_true[k].arg(), epsilon = 1e-6);
            }
            assert_eq!(res.jacobian.as_ref().map(|j| j.nrows()), Some(4));
        }
    }

    #[test]
    fn test_pv_magnitude_and_reference_untouched() {
        let (y, _, mut s) = three_bus();
        s[1].im = 0.0;
        let mut v0 = flat(3);
        v0[0] = Complex64::from_polar(1.02, 0.1);
        v0[1] = Complex64::new(1.01, 0.0);
        let res = newton_pf(
            &y,
            &s,
            &v0,
            &[1],
            &[2],
            &options(1e-9),
            &PatternJacobian,
            &mut DefaultSolver::default(),
        )
        .unwrap();
        assert!(res.converged);
        assert_eq!(res.v[0], v0[0]);
        assert_relative_eq!(res.v[1].norm(), 1.01, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_point_converges_without_iterating() {
        let (y, v_true, s) = three_bus();
        let res = newton_pf(
            &y,
            &s,
            &v_true,
            &[],
            &[1, 2],
            &options(1e-8),
            &SliceJacobian,
            &mut DefaultSolver::default(),
        )
        .unwrap();
        assert!(res.converged);
        assert_eq!(res.iterations, 0);
        assert!(res.jacobian.is_none());
        assert_eq!(res.v, v_true);
    }

    #[test]
    fn test_converged_voltage_is_a_fixed_point() {
        let (y, _, s) = three_bus();
        let mut solver = DefaultSolver::default();
        let solved = newton_pf(&y, &s, &flat(3), &[], &[1, 2], &options(1e-10), &PatternJacobian, &mut solver)
            .unwrap();
        assert!(solved.converged);
        // force exactly one more step from the solution
        let one_step = NewtonOptions {
            tolerance: 1e-300,
            max_iterations: 1,
            use_acceleration: false,
        };
        let stepped = newton_pf(&y, &s, &solved.v, &[], &[1, 2], &one_step, &PatternJacobian, &mut solver)
            .unwrap();
        assert_eq!(stepped.iterations, 1);
        for k in 0..3 {
            assert_relative_eq!((stepped.v[k] - solved.v[k]).norm(), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_setpoints_hold_at_every_iteration() {
        let (y, _, mut s) = three_bus();
        s[1].im = 0.0;
        let mut v0 = flat(3);
        v0[0] = Complex64::from_polar(1.03, -0.2);
        v0[1] = Complex64::new(0.99, 0.0);
        for max_iterations in 1..=4 {
            let opts = NewtonOptions {
                tolerance: 1e-300,
                max_iterations,
                use_acceleration: max_iterations == 2,
            };
            let res = newton_pf(&y, &s, &v0, &[1], &[2], &opts, &SliceJacobian, &mut DefaultSolver::default())
                .unwrap();
            assert_eq!(res.iterations, max_iterations);
            assert_eq!(res.v[0], v0[0]);
            assert_relative_eq!(res.v[1].norm(), 0.99, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_slack_and_single_pv_node() {
        let y = chain_ybus(2, Complex64::new(0.02, 0.08), 0.0);
        let mut s = DVector::zeros(2);
        s[1] = Complex64::new(0.5, 0.0);
        let mut v0 = flat(2);
        v0[1] = Complex64::new(1.01, 0.0);
        for backend in [&SliceJacobian as &dyn JacobianBuilder, &PatternJacobian] {
            let res = newton_pf(&y, &s, &v0, &[1], &[], &options(1e-10), backend, &mut DefaultSolver::default())
                .unwrap();
            assert!(res.converged);
            assert_eq!(res.jacobian.as_ref().map(|j| j.nrows()), Some(1));
            assert_relative_eq!(res.v[1].norm(), 1.01, epsilon = 1e-12);
            // exporting generator leads the slack
            assert!(res.v[1].arg() > 0.0);
            let p1 = (res.v[1] * (&y * &res.v)[1].conj()).re;
            assert_relative_eq!(p1, 0.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_iteration_bound_is_not_an_error() {
        let (y, _, s) = three_bus();
        let opts = NewtonOptions {
            tolerance: 1e-14,
            max_iterations: 1,
            use_acceleration: false,
        };
        let res = newton_pf(&y, &s, &flat(3), &[], &[1, 2], &opts, &PatternJacobian, &mut DefaultSolver::default())
            .unwrap();
        assert!(!res.converged);
        assert_eq!(res.state, PfState::MaxIterReached);
        assert_eq!(res.iterations, 1);
    }

    #[test]
    fn test_iwamoto_reaches_the_same_solution() {
        let (y, v_true, s) = three_bus();
        let plain = newton_pf(&y, &s, &flat(3), &[], &[1, 2], &options(1e-10), &PatternJacobian, &mut DefaultSolver::default())
            .unwrap();
        let opts = NewtonOptions {
            use_acceleration: true,
            ..options(1e-10)
        };
        let accelerated =
            newton_pf(&y, &s, &flat(3), &[], &[1, 2], &opts, &PatternJacobian, &mut DefaultSolver::default()).unwrap();
        assert!(plain.converged && accelerated.converged);
        for k in 0..3 {
            assert_relative_eq!((plain.v[k] - accelerated.v[k]).norm(), 0.0, epsilon = 1e-8);
            assert_relative_eq!((accelerated.v[k] - v_true[k]).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_voltage_dependent_injection_recomputed() {
        let y = chain_ybus(3, Complex64::new(0.02, 0.06), 0.0);
        let mut zip = ZipInjection::zeros(3);
        zip.s_p[1] = Complex64::new(0.2, 0.05);
        zip.s_z[2] = Complex64::new(0.4, 0.1);
        let res = newton_pf(&y, &zip, &flat(3), &[], &[1, 2], &options(1e-9), &SliceJacobian, &mut DefaultSolver::default())
            .unwrap();
        assert!(res.converged);

        let vm = res.v.map(|e| e.norm());
        let flat_sbus = zip.s_bus(&DVector::from_element(3, 1.0));
        assert!((res.s_bus[2] - flat_sbus[2]).norm() > 1e-4);
        assert_eq!(res.s_bus, zip.s_bus(&vm));

        let mis = res.v.component_mul(&(&y * &res.v).conjugate()) - zip.s_bus(&vm);
        for k in 1..3 {
            assert!(mis[k].re.abs() < 1e-9 && mis[k].im.abs() < 1e-9);
        }
    }

    #[test]
    fn test_reference_and_pattern_backends_agree() {
        let y = chain_ybus(4, Complex64::new(0.01, 0.04), 0.02);
        let mut zip = ZipInjection::zeros(4);
        zip.s_gen[1] = Complex64::new(0.3, 0.0);
        zip.s_p[2] = Complex64::new(0.5, 0.2);
        zip.s_i[3] = Complex64::new(0.3, 0.1);
        let mut v0 = flat(4);
        v0[1] = Complex64::new(1.02, 0.0);
        let run = |backend: &dyn JacobianBuilder| {
            newton_pf(&y, &zip, &v0, &[1], &[2, 3], &options(1e-10), backend, &mut DefaultSolver::default())
                .unwrap()
        };
        let a = run(&SliceJacobian);
        let b = run(&PatternJacobian);
        assert!(a.converged && b.converged);
        assert_eq!(a.iterations, b.iterations);
        for k in 0..4 {
            assert_relative_eq!((a.v[k] - b.v[k]).norm(), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_shape_errors() {
        let (y, _, s) = three_bus();
        let mut solver = DefaultSolver::default();
        let opts = options(1e-8);
        let short = DVector::from_element(2, Complex64::new(1.0, 0.0));
        assert!(matches!(
            newton_pf(&y, &s, &short, &[], &[1, 2], &opts, &SliceJacobian, &mut solver),
            Err(PowerFlowError::DimensionMismatch { what: "V0", expected: 3, found: 2 })
        ));
        assert!(matches!(
            newton_pf(&y, &short, &flat(3), &[], &[1, 2], &opts, &SliceJacobian, &mut solver),
            Err(PowerFlowError::DimensionMismatch { what: "Sbus", .. })
        ));
        assert!(matches!(
            newton_pf(&y, &s, &flat(3), &[1], &[1, 2], &opts, &SliceJacobian, &mut solver),
            Err(PowerFlowError::InvalidIndexSet(_))
        ));
        assert!(matches!(
            newton_pf(&y, &s, &flat(3), &[], &[3], &opts, &SliceJacobian, &mut solver),
            Err(PowerFlowError::InvalidIndexSet(_))
        ));
    }

    #[test]
    fn test_singular_jacobian_is_reported() {
        // node 2 is not connected to anything
        let mut coo = CooMatrix::new(3, 3);
        let y = Complex64::new(1.0, -10.0);
        coo.push(0, 0, y);
        coo.push(1, 1, y);
        coo.push(0, 1, -y);
        coo.push(1, 0, -y);
        let y_bus = CscMatrix::from(&coo);
        let mut s = DVector::zeros(3);
        s[2] = Complex64::new(-0.1, 0.0);
        let res = newton_pf(&y_bus, &s, &flat(3), &[], &[1, 2], &options(1e-8), &PatternJacobian, &mut DefaultSolver::default());
        assert!(matches!(res, Err(PowerFlowError::SingularJacobian { iteration: 1, .. })));
    }
}
