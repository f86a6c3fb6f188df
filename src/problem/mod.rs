//! Variational problems: what to solve, independent of how.
//!
//! A [`NonlinearVariationalProblem`] is immutable once built. Construction resolves the Jacobian
//! (deriving it from the residual when none is given) and then validates every form before any
//! object exists, so a failed build leaves nothing behind.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::bcs::{BoundaryCondition, DirichletBcs};
use crate::error::VError;
use crate::form::validate::{check_form_style, check_pde_args};
use crate::form::{EquationStyle, Form, Operand, derivative};
use crate::function::{Discretization, Function};

pub mod linear;

pub use linear::{LinearProblemBuilder, LinearVariationalProblem};

/// Nonlinear equation `F(u; v) = 0` for all test functions `v`.
pub struct NonlinearVariationalProblem {
    residual: Form,
    u: Function,
    bcs: Vec<BoundaryCondition>,
    jacobian: Form,
    jp: Option<Form>,
    style: EquationStyle,
    constant_jacobian: bool,
    dm: OnceCell<Discretization>,
}

/// Builder for [`NonlinearVariationalProblem`].
pub struct ProblemBuilder {
    residual: Operand,
    u: Function,
    bcs: Vec<BoundaryCondition>,
    jacobian: Option<Operand>,
    jp: Option<Operand>,
    style: EquationStyle,
    constant_jacobian: bool,
}

impl ProblemBuilder {
    /// Append boundary conditions, keeping their order.
    pub fn bcs<I, B>(mut self, bcs: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<BoundaryCondition>,
    {
        self.bcs.extend(bcs.into_iter().map(Into::into));
        self
    }

    pub fn bc(mut self, bc: impl Into<BoundaryCondition>) -> Self {
        self.bcs.push(bc.into());
        self
    }

    /// Explicit Jacobian; derived from the residual when omitted.
    pub fn jacobian(mut self, j: impl Into<Operand>) -> Self {
        self.jacobian = Some(j.into());
        self
    }

    /// Operator to build the preconditioner from, if it differs from the Jacobian.
    pub fn preconditioner(mut self, jp: impl Into<Operand>) -> Self {
        self.jp = Some(jp.into());
        self
    }

    pub(crate) fn style(mut self, style: EquationStyle) -> Self {
        self.style = style;
        self
    }

    pub(crate) fn constant_jacobian(mut self, constant: bool) -> Self {
        self.constant_jacobian = constant;
        self
    }

    /// Resolve the Jacobian, validate, and freeze the problem.
    pub fn build(self) -> Result<Rc<NonlinearVariationalProblem>, VError> {
        let jacobian = match self.jacobian {
            Some(j) => j,
            None => match self.residual.as_form() {
                Some(f) => Operand::Form(derivative(f, &self.u)),
                None => return Err(VError::TypeMismatch { what: "residual", found: self.residual.kind() }),
            },
        };
        check_pde_args(&self.residual, &jacobian, self.jp.as_ref())?;
        check_form_style(self.style, &self.bcs)?;

        let residual = self.residual.into_form("residual")?;
        let jacobian = jacobian.into_form("Jacobian")?;
        let jp = self.jp.map(|p| p.into_form("preconditioner")).transpose()?;
        let n = self.u.len();
        if residual.shape().0 != n {
            return Err(VError::DimensionMismatch { expected: n, found: residual.shape().0 });
        }
        check_square(&jacobian, n)?;
        if let Some(jp) = &jp {
            check_square(jp, n)?;
        }
        log::debug!(
            "problem for '{}' ({n} dofs, {} bcs, style {:?})",
            self.u.name(),
            self.bcs.len(),
            self.style
        );
        Ok(Rc::new(NonlinearVariationalProblem {
            residual,
            u: self.u,
            bcs: self.bcs,
            jacobian,
            jp,
            style: self.style,
            constant_jacobian: self.constant_jacobian,
            dm: OnceCell::new(),
        }))
    }
}

/// Operators must map the unknown's space onto itself.
fn check_square(form: &Form, n: usize) -> Result<(), VError> {
    match form.shape() {
        (rows, _) if rows != n => Err(VError::DimensionMismatch { expected: n, found: rows }),
        (_, cols) if cols != n => Err(VError::DimensionMismatch { expected: n, found: cols }),
        _ => Ok(()),
    }
}

impl NonlinearVariationalProblem {
    /// Start building a problem with residual `f` for the unknown `u`.
    pub fn builder(f: impl Into<Operand>, u: &Function) -> ProblemBuilder {
        ProblemBuilder {
            residual: f.into(),
            u: u.clone(),
            bcs: Vec::new(),
            jacobian: None,
            jp: None,
            style: EquationStyle::Residual,
            constant_jacobian: false,
        }
    }

    pub fn residual(&self) -> &Form {
        &self.residual
    }

    pub fn jacobian(&self) -> &Form {
        &self.jacobian
    }

    /// Preconditioning operator, if one was given.
    pub fn preconditioner(&self) -> Option<&Form> {
        self.jp.as_ref()
    }

    /// True when the Jacobian doubles as the preconditioning operator.
    pub fn jp_eq_j(&self) -> bool {
        self.jp.is_none()
    }

    pub fn unknown(&self) -> &Function {
        &self.u
    }

    pub fn bcs(&self) -> &[BoundaryCondition] {
        &self.bcs
    }

    pub fn style(&self) -> EquationStyle {
        self.style
    }

    pub fn is_linear(&self) -> bool {
        self.style == EquationStyle::Linear
    }

    pub fn constant_jacobian(&self) -> bool {
        self.constant_jacobian
    }

    /// Discretization of the unknown's space, computed on first access.
    pub fn dm(&self) -> &Discretization {
        self.dm.get_or_init(|| self.u.function_space().discretization())
    }

    /// Dirichlet conditions only, nested ones flattened, in insertion order.
    pub fn dirichlet_bcs(&self) -> DirichletBcs<'_> {
        DirichletBcs::new(&self.bcs)
    }
}

impl fmt::Debug for NonlinearVariationalProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonlinearVariationalProblem")
            .field("u", &self.u)
            .field("bcs", &self.bcs)
            .field("style", &self.style)
            .field("constant_jacobian", &self.constant_jacobian)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcs::{DirichletBC, EquationBC};
    use crate::form::{BilinearKernel, LinearKernel};
    use crate::function::FunctionSpace;
    use faer::Mat;

    fn residual(u: &Function) -> Form {
        let uc = u.clone();
        Form::linear(LinearKernel::new("F", u.function_space(), move || {
            uc.values().iter().map(|x| x * x - 1.0).collect()
        }))
    }

    #[test]
    fn jacobian_is_derived_when_missing() {
        let v = FunctionSpace::interval(3);
        let u = Function::new(&v);
        let p = NonlinearVariationalProblem::builder(residual(&u), &u).build().unwrap();
        assert_eq!(p.residual().arity().unwrap(), 1);
        assert_eq!(p.jacobian().arity().unwrap(), 2);
        assert!(matches!(p.jacobian(), Form::Derivative(..)));
        assert!(p.jp_eq_j());
        assert!(!p.is_linear());
    }

    #[test]
    fn non_form_residual_is_a_type_mismatch() {
        let v = FunctionSpace::new(2);
        let u = Function::new(&v);
        let err = NonlinearVariationalProblem::builder(1.0, &u).build().unwrap_err();
        assert!(matches!(err, VError::TypeMismatch { what: "residual", found: "Constant" }));
        let err = NonlinearVariationalProblem::builder(residual(&u), &u).jacobian(&u).build().unwrap_err();
        assert!(matches!(err, VError::TypeMismatch { what: "Jacobian", found: "Function" }));
    }

    #[test]
    fn preconditioner_must_be_bilinear() {
        let v = FunctionSpace::new(2);
        let u = Function::new(&v);
        let err = NonlinearVariationalProblem::builder(residual(&u), &u)
            .preconditioner(residual(&u))
            .build()
            .unwrap_err();
        assert!(matches!(err, VError::ArityMismatch { what: "preconditioner", expected: 2, found: 1 }));

        let p = NonlinearVariationalProblem::builder(residual(&u), &u)
            .preconditioner(Form::bilinear(BilinearKernel::constant("P", Mat::identity(2, 2))))
            .build()
            .unwrap();
        assert!(!p.jp_eq_j());
    }

    #[test]
    fn operators_must_match_the_unknown() {
        let v = FunctionSpace::interval(4);
        let u = Function::new(&v);
        let uc = u.clone();
        let f = Form::linear(LinearKernel::new("F", &v, move || uc.values().iter().map(|x| x - 1.0).collect()));
        let err = NonlinearVariationalProblem::builder(f.clone(), &u)
            .jacobian(Form::bilinear(BilinearKernel::constant("J", Mat::identity(3, 3))))
            .build()
            .unwrap_err();
        assert!(matches!(err, VError::DimensionMismatch { expected: 4, found: 3 }));

        let err = NonlinearVariationalProblem::builder(f.clone(), &u)
            .jacobian(Form::bilinear(BilinearKernel::constant("J", Mat::identity(4, 5))))
            .build()
            .unwrap_err();
        assert!(matches!(err, VError::DimensionMismatch { expected: 4, found: 5 }));

        let err = NonlinearVariationalProblem::builder(f, &u)
            .preconditioner(Form::bilinear(BilinearKernel::constant("P", Mat::identity(3, 3))))
            .build()
            .unwrap_err();
        assert!(matches!(err, VError::DimensionMismatch { expected: 4, found: 3 }));
    }

    #[test]
    fn linear_style_bcs_are_rejected_on_residual_problems() {
        let v = FunctionSpace::interval(3);
        let u = Function::new(&v);
        let a = Form::bilinear(BilinearKernel::constant("a", Mat::identity(3, 3)));
        let ebc = EquationBC::linear(a, None, &u, 1);
        let err = NonlinearVariationalProblem::builder(residual(&u), &u).bc(ebc).build().unwrap_err();
        assert!(matches!(err, VError::StyleMismatch));
    }

    #[test]
    fn dm_is_memoized_and_bcs_are_flattened() {
        let v = FunctionSpace::interval(4);
        let u = Function::new(&v);
        let left = DirichletBC::new(&v, 0.0, 1);
        let right = DirichletBC::new(&v, 1.0, 2);
        let ebc = EquationBC::residual(residual(&u), &u, 2).with_bcs([right.into()]);
        let p = NonlinearVariationalProblem::builder(residual(&u), &u)
            .bcs([BoundaryCondition::from(left), ebc.into()])
            .build()
            .unwrap();
        assert!(std::ptr::eq(p.dm(), p.dm()));
        assert_eq!(p.dm().ndofs(), 4);
        let nodes: Vec<_> = p.dirichlet_bcs().flat_map(|bc| bc.nodes().to_vec()).collect();
        assert_eq!(nodes, vec![0, 3]);
        // restartable
        assert_eq!(p.dirichlet_bcs().count(), 2);
    }
}
