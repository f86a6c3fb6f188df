//! Symbolic forms: a closed set of expression nodes with computed arity.
//!
//! A [`Form`] is a cheap-to-clone tree. Leaves are kernels ([`LinearKernel`],
//! [`BilinearKernel`], [`FunctionalKernel`]); interior nodes are sums, scalings, actions on a
//! field and derivatives with respect to a field. Arity is derived from the tags alone:
//!
//! | node              | arity                         |
//! |-------------------|-------------------------------|
//! | `Functional`      | 0                             |
//! | `Linear`          | 1                             |
//! | `Bilinear`        | 2                             |
//! | `Action(a, w)`    | `arity(a) - 1`                |
//! | `Derivative(f,u)` | `arity(f) + 1`                |
//! | `Sum(a, b)`       | `arity(a)`, must equal `b`'s  |
//! | `Scaled(c, a)`    | `arity(a)`                    |
//!
//! Assembling forms into numbers is the job of [`crate::assembly::Assembler`].

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::rc::Rc;

use crate::error::VError;
use crate::function::Function;

pub mod kernel;
pub mod validate;

pub use kernel::{BilinearData, BilinearKernel, FunctionalKernel, LinearKernel};
pub use validate::{check_form_style, check_pde_args};

/// How an equation is written: `F(u; v) == 0` or `a(u, v) == L(v)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationStyle {
    /// `F == 0`
    Residual,
    /// `a == L`
    Linear,
}

/// Symbolic form expression.
#[derive(Clone)]
pub enum Form {
    Functional(Rc<FunctionalKernel>),
    Linear(Rc<LinearKernel>),
    Bilinear(Rc<BilinearKernel>),
    Action(Rc<Form>, Function),
    Sum(Rc<Form>, Rc<Form>),
    Scaled(f64, Rc<Form>),
    Derivative(Rc<Form>, Function),
    /// Empty form of the given arity and `(rows, cols)` shape.
    Zero { arity: usize, shape: (usize, usize) },
}

impl Form {
    pub fn linear(kernel: LinearKernel) -> Self {
        Form::Linear(Rc::new(kernel))
    }

    pub fn bilinear(kernel: BilinearKernel) -> Self {
        Form::Bilinear(Rc::new(kernel))
    }

    pub fn functional(kernel: FunctionalKernel) -> Self {
        Form::Functional(Rc::new(kernel))
    }

    /// Number of arguments: 0 functional, 1 linear, 2 bilinear.
    pub fn arity(&self) -> Result<usize, VError> {
        match self {
            Form::Functional(_) => Ok(0),
            Form::Linear(_) => Ok(1),
            Form::Bilinear(_) => Ok(2),
            Form::Zero { arity, .. } => Ok(*arity),
            Form::Scaled(_, a) => a.arity(),
            Form::Derivative(f, _) => Ok(f.arity()? + 1),
            Form::Action(a, _) => match a.arity()? {
                0 => Err(VError::ArityMismatch { what: "action operand", expected: 1, found: 0 }),
                n => Ok(n - 1),
            },
            Form::Sum(a, b) => {
                let (na, nb) = (a.arity()?, b.arity()?);
                if na != nb {
                    return Err(VError::ArityMismatch { what: "summand", expected: na, found: nb });
                }
                Ok(na)
            }
        }
    }

    /// `(rows, cols)` of the assembled tensor; vectors are `(n, 1)`, scalars `(1, 1)`.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Form::Functional(_) => (1, 1),
            Form::Linear(k) => (k.dim(), 1),
            Form::Bilinear(k) => (k.rows, k.cols),
            Form::Zero { shape, .. } => *shape,
            Form::Scaled(_, a) | Form::Sum(a, _) => a.shape(),
            Form::Action(a, w) => match a.arity() {
                Ok(2) => (a.shape().0, 1),
                Ok(1) if a.shape().0 == w.len() => (1, 1),
                _ => a.shape(),
            },
            Form::Derivative(f, u) => match f.arity() {
                Ok(0) => (u.len(), 1),
                _ => (f.shape().0, u.len()),
            },
        }
    }

    /// True when no node depends on field values, so assembled values never change.
    pub fn is_constant(&self) -> bool {
        match self {
            Form::Bilinear(k) => k.is_constant(),
            Form::Zero { .. } => true,
            Form::Scaled(_, a) => a.is_constant(),
            Form::Sum(a, b) => a.is_constant() && b.is_constant(),
            _ => false,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Form::Zero { .. } => true,
            Form::Scaled(c, a) => *c == 0.0 || a.is_zero(),
            Form::Sum(a, b) => a.is_zero() && b.is_zero(),
            _ => false,
        }
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Form::Functional(k) => write!(f, "{k:?}"),
            Form::Linear(k) => write!(f, "{k:?}"),
            Form::Bilinear(k) => write!(f, "{k:?}"),
            Form::Action(a, w) => write!(f, "action({a:?}, {})", w.name()),
            Form::Sum(a, b) => write!(f, "({a:?} + {b:?})"),
            Form::Scaled(c, a) => write!(f, "{c}*{a:?}"),
            Form::Derivative(a, u) => write!(f, "derivative({a:?}, {})", u.name()),
            Form::Zero { arity, shape } => write!(f, "zero(arity={arity}, {}x{})", shape.0, shape.1),
        }
    }
}

impl Add for Form {
    type Output = Form;
    fn add(self, rhs: Form) -> Form {
        Form::Sum(Rc::new(self), Rc::new(rhs))
    }
}

impl Sub for Form {
    type Output = Form;
    fn sub(self, rhs: Form) -> Form {
        self + (-rhs)
    }
}

impl Neg for Form {
    type Output = Form;
    fn neg(self) -> Form {
        Form::Scaled(-1.0, Rc::new(self))
    }
}

impl Mul<Form> for f64 {
    type Output = Form;
    fn mul(self, rhs: Form) -> Form {
        Form::Scaled(self, Rc::new(rhs))
    }
}

impl Mul<f64> for Form {
    type Output = Form;
    fn mul(self, rhs: f64) -> Form {
        rhs * self
    }
}

/// Action of `form` on the field `w`: replaces its last argument with `w`.
pub fn action(form: &Form, w: &Function) -> Form {
    Form::Action(Rc::new(form.clone()), w.clone())
}

/// Gateaux derivative of `form` with respect to `u`.
///
/// Sums and scalings are differentiated term by term. `action(a, u)` of a constant bilinear
/// form differentiates to `a`, and to zero when the action is on another field. A linear
/// kernel carrying an explicit derivative for `u` becomes that bilinear kernel. All other
/// nodes are kept symbolic as [`Form::Derivative`] and evaluated numerically at assembly.
pub fn derivative(form: &Form, u: &Function) -> Form {
    match form {
        Form::Sum(a, b) => derivative(a, u) + derivative(b, u),
        Form::Scaled(c, a) => *c * derivative(a, u),
        Form::Zero { arity, shape } => Form::Zero { arity: arity + 1, shape: (shape.0, u.len()) },
        Form::Action(a, w) if a.is_constant() => {
            if w.ptr_eq(u) {
                (**a).clone()
            } else {
                let rows = a.shape().0;
                Form::Zero { arity: 2, shape: (rows, u.len()) }
            }
        }
        Form::Linear(k) => match k.derivative_for(u) {
            Some(jac) => Form::bilinear(BilinearKernel::from_fn(
                format!("d{}/d{}", k.name(), u.name()),
                k.dim(),
                u.len(),
                jac,
            )),
            None => Form::Derivative(Rc::new(form.clone()), u.clone()),
        },
        _ => Form::Derivative(Rc::new(form.clone()), u.clone()),
    }
}

/// A value handed to problem builders in a form slot.
///
/// Only the `Form` variant is accepted; the others exist so that misuse is reported as a
/// [`VError::TypeMismatch`] instead of being silently coerced.
#[derive(Clone, Debug)]
pub enum Operand {
    Form(Form),
    Constant(f64),
    Function(Function),
}

impl Operand {
    pub fn kind(&self) -> &'static str {
        match self {
            Operand::Form(_) => "Form",
            Operand::Constant(_) => "Constant",
            Operand::Function(_) => "Function",
        }
    }

    pub fn as_form(&self) -> Option<&Form> {
        match self {
            Operand::Form(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn into_form(self, what: &'static str) -> Result<Form, VError> {
        match self {
            Operand::Form(f) => Ok(f),
            other => Err(VError::TypeMismatch { what, found: other.kind() }),
        }
    }
}

impl From<Form> for Operand {
    fn from(f: Form) -> Self {
        Operand::Form(f)
    }
}

impl From<f64> for Operand {
    fn from(c: f64) -> Self {
        Operand::Constant(c)
    }
}

impl From<Function> for Operand {
    fn from(f: Function) -> Self {
        Operand::Function(f)
    }
}

impl From<&Function> for Operand {
    fn from(f: &Function) -> Self {
        Operand::Function(f.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionSpace;
    use faer::Mat;

    fn mass(n: usize) -> Form {
        Form::bilinear(BilinearKernel::constant("m", Mat::identity(n, n)))
    }

    #[test]
    fn arity_follows_tags() {
        let v = FunctionSpace::new(3);
        let u = Function::new(&v);
        let a = mass(3);
        let l = Form::linear(LinearKernel::new("l", &v, || vec![1.0; 3]));
        assert_eq!(a.arity().unwrap(), 2);
        assert_eq!(action(&a, &u).arity().unwrap(), 1);
        assert_eq!(action(&l, &u).arity().unwrap(), 0);
        assert_eq!(derivative(&l, &u).arity().unwrap(), 2);
        assert_eq!((action(&a, &u) - l.clone()).arity().unwrap(), 1);
        assert!(matches!(
            (a + l).arity(),
            Err(VError::ArityMismatch { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn derivative_of_constant_action_is_the_operator() {
        let v = FunctionSpace::new(2);
        let u = Function::new(&v);
        let w = Function::new(&v);
        let a = mass(2);
        assert!(matches!(derivative(&action(&a, &u), &u), Form::Bilinear(_)));
        assert!(derivative(&action(&a, &w), &u).is_zero());
        let l = Form::linear(LinearKernel::new("l", &v, || vec![0.0; 2]));
        assert!(matches!(derivative(&l, &u), Form::Derivative(..)));
        let shape = derivative(&(action(&a, &u) - l), &u).shape();
        assert_eq!(shape, (2, 2));
    }

    #[test]
    fn operand_reports_its_kind() {
        let v = FunctionSpace::new(1);
        let u = Function::new(&v);
        let err = Operand::from(&u).into_form("residual").unwrap_err();
        assert!(matches!(err, VError::TypeMismatch { what: "residual", found: "Function" }));
        assert!(Operand::from(0.0).as_form().is_none());
    }
}
