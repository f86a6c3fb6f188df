//! Null-space descriptors.
//!
//! A [`VectorSpaceBasis`] spans the subspace along which an operator is singular (or nearly so).
//! The engine removes the transpose null space from right-hand sides and the operator null space
//! from solutions. The near null space is only validated and stored: it is there for engines and
//! preconditioners supplied by the caller, and the built-in two-level preconditioner ignores it.

use crate::core::InnerProduct;
use crate::error::VError;

/// Which of the three null-space slots a basis occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullspaceKind {
    /// Null space of the operator; projected out of solutions.
    Operator,
    /// Null space of the transpose; projected out of right-hand sides.
    Transpose,
    /// Near null space, kept for caller-supplied multilevel methods; not read by the built-in
    /// engine.
    Near,
}

/// Span of explicit vectors, optionally together with the constant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSpaceBasis {
    vecs: Vec<Vec<f64>>,
    constant: bool,
}

impl VectorSpaceBasis {
    pub fn new(vecs: Vec<Vec<f64>>) -> Self {
        Self { vecs, constant: false }
    }

    /// The constant mode only.
    pub fn constant() -> Self {
        Self { vecs: Vec::new(), constant: true }
    }

    /// Add the constant mode to the span.
    pub fn with_constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn has_constant(&self) -> bool {
        self.constant
    }

    pub fn vecs(&self) -> &[Vec<f64>] {
        &self.vecs
    }

    pub fn dim(&self) -> usize {
        self.vecs.len() + usize::from(self.constant)
    }

    /// Modified Gram–Schmidt on the explicit vectors, orthogonal to the constant mode when present.
    /// Vectors that vanish under orthogonalization are dropped.
    pub fn orthonormalize(&mut self) {
        let ip = ();
        let mut out: Vec<Vec<f64>> = Vec::with_capacity(self.vecs.len());
        for mut v in self.vecs.drain(..) {
            if self.constant {
                remove_mean(&mut v);
            }
            for q in &out {
                let c = ip.dot(&v, q);
                for (vi, qi) in v.iter_mut().zip(q) {
                    *vi -= c * qi;
                }
            }
            let nrm = ip.norm(&v);
            if nrm > 1e-12 {
                v.iter_mut().for_each(|vi| *vi /= nrm);
                out.push(v);
            }
        }
        self.vecs = out;
    }

    pub fn is_orthonormal(&self, tol: f64) -> bool {
        let ip = ();
        for (i, a) in self.vecs.iter().enumerate() {
            if (ip.norm(a) - 1.0).abs() > tol {
                return false;
            }
            if self.constant && mean(a).abs() * (a.len() as f64).sqrt() > tol {
                return false;
            }
            if self.vecs[..i].iter().any(|b| ip.dot(a, b).abs() > tol) {
                return false;
            }
        }
        true
    }

    /// Check length and orthonormality against a system of size `n`.
    pub fn validate(&self, n: usize) -> Result<(), VError> {
        if let Some(bad) = self.vecs.iter().find(|v| v.len() != n) {
            return Err(VError::ConfigurationError(format!(
                "null-space vector has length {}, system has {n} dofs",
                bad.len()
            )));
        }
        if !self.is_orthonormal(1e-10) {
            return Err(VError::ConfigurationError(
                "null-space basis is not orthonormal; call orthonormalize() first".into(),
            ));
        }
        Ok(())
    }

    /// Project the span out of `v`.
    pub fn remove(&self, v: &mut [f64]) {
        if self.constant {
            remove_mean(v);
        }
        let ip = ();
        let owned = v.to_vec();
        for q in &self.vecs {
            let c = ip.dot(&owned, q);
            for (vi, qi) in v.iter_mut().zip(q) {
                *vi -= c * qi;
            }
        }
    }
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 }
}

fn remove_mean(v: &mut [f64]) {
    let m = mean(v);
    v.iter_mut().for_each(|x| *x -= m);
}

/// The three independent null-space slots.
#[derive(Debug, Clone, Default)]
pub struct Nullspaces {
    pub nullspace: Option<VectorSpaceBasis>,
    pub transpose: Option<VectorSpaceBasis>,
    pub near: Option<VectorSpaceBasis>,
}

impl Nullspaces {
    pub fn get(&self, kind: NullspaceKind) -> Option<&VectorSpaceBasis> {
        match kind {
            NullspaceKind::Operator => self.nullspace.as_ref(),
            NullspaceKind::Transpose => self.transpose.as_ref(),
            NullspaceKind::Near => self.near.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, kind: NullspaceKind) -> &mut Option<VectorSpaceBasis> {
        match kind {
            NullspaceKind::Operator => &mut self.nullspace,
            NullspaceKind::Transpose => &mut self.transpose,
            NullspaceKind::Near => &mut self.near,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn orthonormalize_then_remove() {
        let mut b = VectorSpaceBasis::new(vec![vec![1.0, 1.0, 0.0], vec![2.0, 2.0, 0.0], vec![0.0, 0.0, 3.0]]);
        assert!(!b.is_orthonormal(1e-12));
        b.orthonormalize();
        // the parallel vector is dropped
        assert_eq!(b.dim(), 2);
        assert!(b.validate(3).is_ok());
        let mut v = vec![1.0, 2.0, 3.0];
        b.remove(&mut v);
        assert_abs_diff_eq!(v[0], -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(v[1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(v[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_mode_removes_mean() {
        let b = VectorSpaceBasis::constant();
        let mut v = vec![1.0, 2.0, 6.0];
        b.remove(&mut v);
        assert_eq!(v, vec![-2.0, -1.0, 3.0]);
        assert_eq!(b.dim(), 1);
    }

    #[test]
    fn validation_rejects_bad_bases() {
        let short = VectorSpaceBasis::new(vec![vec![1.0]]);
        assert!(matches!(short.validate(2), Err(VError::ConfigurationError(_))));
        let skewed = VectorSpaceBasis::new(vec![vec![3.0, 4.0]]);
        assert!(matches!(skewed.validate(2), Err(VError::ConfigurationError(_))));
    }
}
