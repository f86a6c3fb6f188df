//! Linear problems `a(u, v) = L(v)`, rewritten into residual form.

use std::ops::Deref;
use std::rc::Rc;

use crate::bcs::BoundaryCondition;
use crate::error::VError;
use crate::form::{EquationStyle, Form, Operand, action};
use crate::function::Function;

use super::NonlinearVariationalProblem;

/// Linear variational problem. Dereferences to the residual-form problem it was lowered to,
/// with `F = action(a, u) - L` and `J = a`.
#[derive(Debug, Clone)]
pub struct LinearVariationalProblem {
    inner: Rc<NonlinearVariationalProblem>,
    a: Form,
    l: Option<Form>,
}

/// Builder for [`LinearVariationalProblem`].
pub struct LinearProblemBuilder {
    a: Operand,
    l: Option<Operand>,
    u: Function,
    bcs: Vec<BoundaryCondition>,
    ap: Option<Operand>,
    constant_jacobian: bool,
}

impl LinearProblemBuilder {
    /// Right-hand side `L`; omit it for a homogeneous system.
    pub fn rhs(mut self, l: impl Into<Operand>) -> Self {
        self.l = Some(l.into());
        self
    }

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

    pub fn preconditioner(mut self, ap: impl Into<Operand>) -> Self {
        self.ap = Some(ap.into());
        self
    }

    /// Declare that `a` does not change between solves, so it is assembled only once.
    pub fn constant_jacobian(mut self, constant: bool) -> Self {
        self.constant_jacobian = constant;
        self
    }

    pub fn build(self) -> Result<LinearVariationalProblem, VError> {
        let a = self.a.into_form("Jacobian")?;
        let l = match self.l {
            None => None,
            Some(op) => {
                let l = op.into_form("right-hand side")?;
                let found = l.arity()?;
                if found != 1 {
                    return Err(VError::ArityMismatch { what: "right-hand side", expected: 1, found });
                }
                Some(l)
            }
        };
        let residual = match &l {
            Some(l) => action(&a, &self.u) - l.clone(),
            None => action(&a, &self.u),
        };
        let mut builder = NonlinearVariationalProblem::builder(residual, &self.u)
            .jacobian(a.clone())
            .bcs(self.bcs)
            .style(EquationStyle::Linear)
            .constant_jacobian(self.constant_jacobian);
        if let Some(ap) = self.ap {
            builder = builder.preconditioner(ap);
        }
        Ok(LinearVariationalProblem { inner: builder.build()?, a, l })
    }
}

impl LinearVariationalProblem {
    /// Start building `a(u, v) = L(v)` for the unknown `u`.
    pub fn builder(a: impl Into<Operand>, u: &Function) -> LinearProblemBuilder {
        LinearProblemBuilder {
            a: a.into(),
            l: None,
            u: u.clone(),
            bcs: Vec::new(),
            ap: None,
            constant_jacobian: false,
        }
    }

    /// The bilinear form `a`.
    pub fn lhs(&self) -> &Form {
        &self.a
    }

    /// The right-hand side, `None` for a homogeneous system.
    pub fn rhs(&self) -> Option<&Form> {
        self.l.as_ref()
    }

    /// Shared handle to the residual-form problem.
    pub fn problem(&self) -> &Rc<NonlinearVariationalProblem> {
        &self.inner
    }
}

impl Deref for LinearVariationalProblem {
    type Target = NonlinearVariationalProblem;

    fn deref(&self) -> &NonlinearVariationalProblem {
        &self.inner
    }
}
