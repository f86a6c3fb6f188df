//! Solver for [`LinearVariationalProblem`]s.

use std::ops::{Deref, DerefMut};

use crate::problem::LinearVariationalProblem;

use super::{NonlinearVariationalSolver, SolverBuilder, default_linear_parameters};

/// A [`NonlinearVariationalSolver`] defaulting to a single linear solve (`snes_type=ksponly`).
#[derive(Debug)]
pub struct LinearVariationalSolver {
    inner: NonlinearVariationalSolver,
}

impl LinearVariationalSolver {
    pub fn builder(problem: &LinearVariationalProblem) -> SolverBuilder<Self> {
        SolverBuilder::new(problem.problem().clone(), default_linear_parameters(), |inner| Self { inner })
    }

    /// Force reassembly of the operator on the next solve, e.g. after changing a coefficient of
    /// a problem declared with a constant Jacobian.
    pub fn invalidate_jacobian(&mut self) {
        self.inner.context_mut().invalidate_jacobian();
    }
}

impl Deref for LinearVariationalSolver {
    type Target = NonlinearVariationalSolver;

    fn deref(&self) -> &NonlinearVariationalSolver {
        &self.inner
    }
}

impl DerefMut for LinearVariationalSolver {
    fn deref_mut(&mut self) -> &mut NonlinearVariationalSolver {
        &mut self.inner
    }
}
