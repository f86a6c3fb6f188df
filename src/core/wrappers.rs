//! Wrappers for faer dense matrix types and vector operations.
//!
//! `MatVec` for `faer::Mat` and `InnerProduct` for `()`, both over plain slices so the Krylov
//! loop can hand in work vectors and caller buffers alike. Inner products optionally run on Rayon.
//!
//! # References
//! - [faer crate documentation](https://docs.rs/faer)
//! - [num-traits crate documentation](https://docs.rs/num-traits)

use crate::core::traits::{InnerProduct, MatVec};
use faer::Mat;
use num_traits::Float;

/// Dense `y = A x` over a column-major faer matrix, one column at a time.
impl<T: Float> MatVec<T> for Mat<T> {
    fn matvec(&self, x: &[T], y: &mut [T]) {
        assert_eq!(self.ncols(), x.len(), "operand length does not match the operator's columns");
        assert_eq!(self.nrows(), y.len(), "result length does not match the operator's rows");
        y.iter_mut().for_each(|yi| *yi = T::zero());
        for (j, xj) in x.iter().enumerate() {
            for (i, yi) in y.iter_mut().enumerate() {
                *yi = *yi + self[(i, j)] * *xj;
            }
        }
    }
}

impl<T: Float + Send + Sync> InnerProduct<T> for () {
    fn dot(&self, x: &[T], y: &[T]) -> T {
        assert_eq!(x.len(), y.len(), "inner product of slices with different lengths");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.par_iter().zip(y.par_iter()).map(|(a, b)| *a * *b).reduce(T::zero, |acc, v| acc + v)
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter().zip(y).fold(T::zero(), |acc, (a, b)| acc + *a * *b)
        }
    }

    fn norm(&self, x: &[T]) -> T {
        self.dot(x, x).sqrt()
    }
}

/// `y ← y + alpha · x`
pub fn axpy<T: Float>(alpha: T, x: &[T], y: &mut [T]) {
    assert_eq!(x.len(), y.len(), "Vectors must have the same length");
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = *yi + alpha * *xi;
    }
}

/// Euclidean norm of a slice.
pub fn norm2(x: &[f64]) -> f64 {
    ().norm(x)
}

/// Returns `true` if every entry is finite.
pub fn all_finite(x: &[f64]) -> bool {
    x.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn matvec_matches_manual_product() {
        let a = Mat::from_fn(2, 3, |i, j| (i * 3 + j) as f64);
        let x = vec![1.0, -1.0, 2.0];
        let mut y = vec![0.0; 2];
        a.matvec(&x, &mut y);
        assert_eq!(y, vec![3.0, 9.0]);
    }

    #[test]
    fn axpy_and_norm() {
        let mut y = vec![1.0, 1.0];
        axpy(2.0, &[1.0, 0.5], &mut y);
        assert_eq!(y, vec![3.0, 2.0]);
        assert_abs_diff_eq!(norm2(&[3.0, 4.0]), 5.0, epsilon = 1e-14);
        assert!(!all_finite(&[1.0, f64::NAN]));
    }

    #[test]
    fn operations_act_on_sub_slices() {
        let a = Mat::<f64>::identity(2, 2);
        let x = [0.0, 3.0, 4.0, 0.0];
        let mut y = [7.0; 4];
        a.matvec(&x[1..3], &mut y[2..]);
        assert_eq!(y, [7.0, 7.0, 3.0, 4.0]);
        assert_abs_diff_eq!(().dot(&x[..2], &x[1..3]), 12.0, epsilon = 1e-14);
        assert_abs_diff_eq!(().norm(&x[1..3]), 5.0, epsilon = 1e-14);
        assert_abs_diff_eq!(norm2(&y[2..]), 5.0, epsilon = 1e-14);
    }
}
