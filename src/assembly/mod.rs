//! Form assembly: forms in, vectors and matrices out.
//!
//! The [`Assembler`] trait is the seam to whatever turns symbolic forms into numbers. The crate
//! ships [`DenseAssembler`], which evaluates kernel closures into `Vec<f64>` / `faer::Mat<f64>`
//! and computes symbolic [`Form::Derivative`] nodes by forward finite differences, perturbing one
//! dof of the differentiation field at a time.

use faer::Mat;

use crate::error::VError;
use crate::form::{Form, derivative};
use crate::function::Function;

/// Assembly service consumed by the solver context.
pub trait Assembler {
    /// Assemble an arity-1 form into `into`, resizing it as needed.
    fn assemble_vector(&self, form: &Form, into: &mut Vec<f64>) -> Result<(), VError>;

    /// Assemble an arity-2 form into `into`, reallocating only on a shape change.
    fn assemble_matrix(&self, form: &Form, into: &mut Mat<f64>) -> Result<(), VError>;

    /// Assemble an arity-0 form.
    fn assemble_scalar(&self, form: &Form) -> Result<f64, VError>;

    /// Symbolic derivative of `form` with respect to `wrt`.
    fn differentiate(&self, form: &Form, wrt: &Function) -> Form {
        derivative(form, wrt)
    }

    fn vector(&self, form: &Form) -> Result<Vec<f64>, VError> {
        let mut v = Vec::new();
        self.assemble_vector(form, &mut v)?;
        Ok(v)
    }

    fn matrix(&self, form: &Form) -> Result<Mat<f64>, VError> {
        let (r, c) = form.shape();
        let mut m = Mat::zeros(r, c);
        self.assemble_matrix(form, &mut m)?;
        Ok(m)
    }
}

/// Dense evaluator of kernel forms.
#[derive(Debug, Clone)]
pub struct DenseAssembler {
    /// Relative finite-difference step; the absolute step is `fd_step * max(|u_j|, 1)`.
    pub fd_step: f64,
}

impl Default for DenseAssembler {
    fn default() -> Self {
        Self { fd_step: f64::EPSILON.sqrt() }
    }
}

fn expect_arity(form: &Form, expected: usize) -> Result<(), VError> {
    let found = form.arity()?;
    if found != expected {
        return Err(VError::ArityMismatch { what: "assembled form", expected, found });
    }
    Ok(())
}

fn check_len(expected: usize, found: usize) -> Result<(), VError> {
    if expected != found {
        return Err(VError::DimensionMismatch { expected, found });
    }
    Ok(())
}

impl DenseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_vector(&self, form: &Form, scale: f64, out: &mut [f64]) -> Result<(), VError> {
        match form {
            Form::Linear(k) => {
                let v = k.evaluate();
                check_len(out.len(), v.len())?;
                for (o, vi) in out.iter_mut().zip(&v) {
                    *o += scale * vi;
                }
            }
            Form::Action(a, w) => {
                let m = self.matrix(a)?;
                check_len(m.ncols(), w.len())?;
                check_len(out.len(), m.nrows())?;
                let x = w.values();
                for (i, o) in out.iter_mut().enumerate() {
                    let mut acc = 0.0;
                    for (j, xj) in x.iter().enumerate() {
                        acc += m[(i, j)] * xj;
                    }
                    *o += scale * acc;
                }
            }
            Form::Sum(a, b) => {
                self.add_vector(a, scale, out)?;
                self.add_vector(b, scale, out)?;
            }
            Form::Scaled(c, a) => self.add_vector(a, scale * c, out)?,
            Form::Zero { .. } => {}
            Form::Derivative(f, u) => {
                check_len(out.len(), u.len())?;
                let base = self.assemble_scalar(f)?;
                for j in 0..u.len() {
                    let h = self.step(u.get(j));
                    let fj = self.perturbed(u, j, h, || self.assemble_scalar(f))?;
                    out[j] += scale * (fj - base) / h;
                }
            }
            Form::Functional(_) | Form::Bilinear(_) => {
                return Err(VError::Unsupported("vector assembly of a non-linear-form node"));
            }
        }
        Ok(())
    }

    fn add_matrix(&self, form: &Form, scale: f64, out: &mut Mat<f64>) -> Result<(), VError> {
        match form {
            Form::Bilinear(k) => {
                let m = k.evaluate();
                check_len(out.nrows(), m.nrows())?;
                check_len(out.ncols(), m.ncols())?;
                for j in 0..m.ncols() {
                    for i in 0..m.nrows() {
                        out[(i, j)] += scale * m[(i, j)];
                    }
                }
            }
            Form::Sum(a, b) => {
                self.add_matrix(a, scale, out)?;
                self.add_matrix(b, scale, out)?;
            }
            Form::Scaled(c, a) => self.add_matrix(a, scale * c, out)?,
            Form::Zero { .. } => {}
            Form::Derivative(f, u) => {
                check_len(out.ncols(), u.len())?;
                let base = self.vector(f)?;
                check_len(out.nrows(), base.len())?;
                let mut col = Vec::with_capacity(base.len());
                for j in 0..u.len() {
                    let h = self.step(u.get(j));
                    self.perturbed(u, j, h, || self.assemble_vector(f, &mut col))?;
                    for i in 0..base.len() {
                        out[(i, j)] += scale * (col[i] - base[i]) / h;
                    }
                }
            }
            Form::Functional(_) | Form::Linear(_) | Form::Action(..) => {
                return Err(VError::Unsupported("matrix assembly of a non-bilinear node"));
            }
        }
        Ok(())
    }

    fn step(&self, uj: f64) -> f64 {
        self.fd_step * uj.abs().max(1.0)
    }

    // Evaluates `eval` with u[j] shifted by h; u[j] is restored bit-for-bit afterwards.
    fn perturbed<R>(
        &self,
        u: &Function,
        j: usize,
        h: f64,
        eval: impl FnOnce() -> Result<R, VError>,
    ) -> Result<R, VError> {
        let saved = u.get(j);
        u.set(j, saved + h);
        let out = eval();
        u.set(j, saved);
        out
    }
}

impl Assembler for DenseAssembler {
    fn assemble_vector(&self, form: &Form, into: &mut Vec<f64>) -> Result<(), VError> {
        expect_arity(form, 1)?;
        let (n, _) = form.shape();
        into.clear();
        into.resize(n, 0.0);
        self.add_vector(form, 1.0, into)
    }

    fn assemble_matrix(&self, form: &Form, into: &mut Mat<f64>) -> Result<(), VError> {
        expect_arity(form, 2)?;
        let (r, c) = form.shape();
        if into.nrows() != r || into.ncols() != c {
            *into = Mat::zeros(r, c);
        } else {
            for j in 0..c {
                for i in 0..r {
                    into[(i, j)] = 0.0;
                }
            }
        }
        self.add_matrix(form, 1.0, into)
    }

    fn assemble_scalar(&self, form: &Form) -> Result<f64, VError> {
        expect_arity(form, 0)?;
        match form {
            Form::Functional(k) => Ok(k.evaluate()),
            Form::Action(l, w) => {
                let v = self.vector(l)?;
                check_len(v.len(), w.len())?;
                Ok(v.iter().zip(w.values().iter()).map(|(a, b)| a * b).sum())
            }
            Form::Sum(a, b) => Ok(self.assemble_scalar(a)? + self.assemble_scalar(b)?),
            Form::Scaled(c, a) => Ok(c * self.assemble_scalar(a)?),
            Form::Zero { .. } => Ok(0.0),
            _ => Err(VError::Unsupported("scalar assembly of this node")),
        }
    }
}
