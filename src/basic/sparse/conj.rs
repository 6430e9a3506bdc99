use nalgebra_sparse::CscMatrix;
use num_complex::Complex;
use simba::simd::{SimdComplexField, SimdRealField};

/// Trait for computing the conjugate of a matrix.
pub(crate) trait Conjugate {
    type Mat;

    /// Returns the conjugate of the matrix.
    fn conjugate(&self) -> Self::Mat;
}

impl<T: SimdRealField> Conjugate for CscMatrix<Complex<T>>
where
    Complex<T>: SimdComplexField,
{
    type Mat = CscMatrix<Complex<T>>;

    fn conjugate(&self) -> Self::Mat {
        let values = self.values().iter().map(|v| v.clone().simd_conjugate()).collect();
        // same pattern, same number of values
        unsafe {
            CscMatrix::try_from_pattern_and_values(self.pattern().clone(), values).unwrap_unchecked()
        }
    }
}

/// Trait for splitting a complex matrix into real and imaginary parts.
pub(crate) trait RealImage {
    type Mat;

    /// Returns the real and imaginary parts, both on the pattern of `self`.
    fn real_imag(&self) -> (Self::Mat, Self::Mat);
}

impl<T: SimdRealField> RealImage for CscMatrix<Complex<T>>
where
    Complex<T>: SimdComplexField<SimdRealField = T>,
{
    type Mat = CscMatrix<T>;

    fn real_imag(&self) -> (Self::Mat, Self::Mat) {
        let (re, im): (Vec<T>, Vec<T>) = self
            .values()
            .iter()
            .map(|v| (v.clone().simd_real(), v.clone().simd_imaginary()))
            .unzip();
        unsafe {
            (
                CscMatrix::try_from_pattern_and_values(self.pattern().clone(), re).unwrap_unchecked(),
                CscMatrix::try_from_pattern_and_values(self.pattern().clone(), im).unwrap_unchecked(),
            )
        }
    }
}
