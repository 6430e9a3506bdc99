//! Optimal step-size multiplier for Newton-Raphson (Iwamoto & Tamura).
//!
//! The mismatch after a scaled step `x + mu * dx` is approximated by
//! `a + mu * b + mu^2 * c`. The multiplier minimises half its squared norm.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;

/// Imaginary parts below this (relative to the root modulus) count as real.
const REAL_ROOT_TOL: f64 = 1e-9;

/// Computes the step multiplier `mu`.
///
/// * `f` - mismatch `a` at the current iterate.
/// * `jac` - Jacobian at the current iterate, `b = jac * dx`.
/// * `jac_dv` - Jacobian evaluated at the voltage increment, `c = jac_dv * dx / 2`.
/// * `dx` - Newton increment solving `jac * dx = -f`.
///
/// Returns 1 when the cubic has no positive real root.
pub fn iwamoto_multiplier(
    f: &DVector<f64>,
    jac: &CscMatrix<f64>,
    jac_dv: &CscMatrix<f64>,
    dx: &DVector<f64>,
) -> f64 {
    let a = f;
    let b: DVector<f64> = jac * dx;
    let c: DVector<f64> = (jac_dv * dx) * 0.5;

    let g0 = a.dot(&b);
    let g1 = b.dot(&b) + 2.0 * a.dot(&c);
    let g2 = 3.0 * b.dot(&c);
    let g3 = 2.0 * c.dot(&c);

    let cost = |mu: f64| 0.5 * (a + &b * mu + &c * (mu * mu)).norm_squared();

    positive_real_roots(&[g0, g1, g2, g3])
        .into_iter()
        .map(|mu| (mu, cost(mu)))
        .min_by(|x, y| x.1.total_cmp(&y.1))
        .map_or(1.0, |(mu, _)| mu)
}

/// Positive real roots of `sum(coeffs[k] * x^k)`.
///
/// Leading coefficients that vanish relative to the largest one are dropped,
/// the remaining polynomial is solved through its companion matrix.
fn positive_real_roots(coeffs: &[f64]) -> Vec<f64> {
    let scale = coeffs.iter().fold(0.0_f64, |m, c| m.max(c.abs()));
    if !scale.is_finite() || scale == 0.0 {
        return Vec::new();
    }
    let Some(degree) = coeffs.iter().rposition(|c| c.abs() > scale * 1e-14) else {
        return Vec::new();
    };
    let lead = coeffs[degree];
    match degree {
        0 => Vec::new(),
        1 => {
            let root = -coeffs[0] / lead;
            if root > 0.0 { vec![root] } else { Vec::new() }
        }
        _ => {
            let companion = DMatrix::from_fn(degree, degree, |r, c| {
                if c == degree - 1 {
                    -coeffs[r] / lead
                } else if r == c + 1 {
                    1.0
                } else {
                    0.0
                }
            });
            companion
                .complex_eigenvalues()
                .iter()
                .filter(|z| z.im.abs() <= REAL_ROOT_TOL * z.norm().max(1.0))
                .map(|z| z.re)
                .filter(|&x| x > 0.0 && x.is_finite())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_roots_of_known_cubic() {
        // (x - 1)(x - 2)(x + 3) = x^3 - 7x + 6
        let mut roots = positive_real_roots(&[6.0, -7.0, 0.0, 1.0]);
        roots.sort_by(f64::total_cmp);
        assert_eq!(roots.len(), 2);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(roots[1], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_polynomials() {
        assert!(positive_real_roots(&[0.0, 0.0, 0.0, 0.0]).is_empty());
        assert_eq!(positive_real_roots(&[-2.0, 4.0, 0.0, 0.0]), vec![0.5]);
        assert!(positive_real_roots(&[1.0, 1.0, 0.0, 0.0]).is_empty());
    }

    #[test]
    fn test_linear_mismatch_gives_full_step() {
        let jac: CscMatrix<f64> = CscMatrix::identity(2);
        let zero: CscMatrix<f64> = CscMatrix::zeros(2, 2);
        let f = DVector::from_vec(vec![0.3, -0.2]);
        let dx = -&f;
        assert_relative_eq!(iwamoto_multiplier(&f, &jac, &zero, &dx), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_curvature_shortens_step() {
        let jac: CscMatrix<f64> = CscMatrix::identity(1);
        let f = DVector::from_vec(vec![1.0]);
        let dx = DVector::from_vec(vec![-1.0]);
        // mismatch along the step: 1 - mu + mu^2, minimum at mu = 0.5
        let jac_dv: CscMatrix<f64> = CscMatrix::identity(1) * -2.0;
        assert_relative_eq!(iwamoto_multiplier(&f, &jac, &jac_dv, &dx), 0.5, epsilon = 1e-9);
    }
}
