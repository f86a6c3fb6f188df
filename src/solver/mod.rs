//! Variational solvers: option handling, boundary conditions and the solve cycle around an engine.
//!
//! A solve reapplies the Dirichlet conditions, snapshots the unknown, installs the merged options
//! for the duration of the engine run, hands the [`SolverContext`] to the engine and copies back a
//! converged iterate. Any failure leaves the unknown at the snapshot.

use std::any::Any;
use std::rc::Rc;

use crate::assembly::{Assembler, DenseAssembler};
use crate::config::{OptionsDatabase, OptionsManager, SolverParameters};
use crate::context::nullspace::{NullspaceKind, VectorSpaceBasis};
use crate::context::snes_context::{AppContext, SolverCallbacks, SolverContext};
use crate::context::transfer::TransferManager;
use crate::engine::{NewtonEngine, NonlinearEngine, SnesType, SolveReport};
use crate::error::{CallbackError, VError};
use crate::function::Function;
use crate::problem::NonlinearVariationalProblem;

pub mod linear;

pub use linear::LinearVariationalSolver;

/// Linear-solver defaults shared by every solver.
pub fn default_ksp_parameters() -> SolverParameters {
    crate::parameters! {
        "mat_type" => "aij",
        "ksp_type" => "preonly",
        "pc_type" => "lu",
        "ksp_rtol" => 1e-7,
    }
}

/// Defaults of [`NonlinearVariationalSolver`].
pub fn default_snes_parameters() -> SolverParameters {
    let mut p = default_ksp_parameters();
    p.extend(crate::parameters! {
        "snes_type" => "newtonls",
        "snes_linesearch_type" => "basic",
        "ksp_rtol" => 1e-5,
    });
    p
}

/// Defaults of [`LinearVariationalSolver`].
pub fn default_linear_parameters() -> SolverParameters {
    let mut p = default_ksp_parameters();
    p.extend(crate::parameters! { "snes_type" => "ksponly" });
    p
}

/// Builder shared by the nonlinear and linear solvers; `S` is the solver it produces.
pub struct SolverBuilder<S = NonlinearVariationalSolver> {
    problem: Rc<NonlinearVariationalProblem>,
    defaults: SolverParameters,
    parameters: SolverParameters,
    options_prefix: Option<String>,
    database: Option<OptionsDatabase>,
    nullspaces: Vec<(NullspaceKind, VectorSpaceBasis)>,
    callbacks: SolverCallbacks,
    assembler: Option<Rc<dyn Assembler>>,
    engine: Option<Box<dyn NonlinearEngine>>,
    transfer_manager: Option<Rc<dyn TransferManager>>,
    appctx: AppContext,
    wrap: fn(NonlinearVariationalSolver) -> S,
}

impl<S> SolverBuilder<S> {
    pub(crate) fn new(
        problem: Rc<NonlinearVariationalProblem>,
        defaults: SolverParameters,
        wrap: fn(NonlinearVariationalSolver) -> S,
    ) -> Self {
        Self {
            problem,
            defaults,
            parameters: SolverParameters::new(),
            options_prefix: None,
            database: None,
            nullspaces: Vec::new(),
            callbacks: SolverCallbacks::default(),
            assembler: None,
            engine: None,
            transfer_manager: None,
            appctx: AppContext::new(),
            wrap,
        }
    }

    /// Explicit parameters; these take precedence over the defaults and the options store.
    pub fn solver_parameters(mut self, parameters: SolverParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Prefix for this solver's keys in the options store; a unique one is generated otherwise.
    pub fn options_prefix(mut self, prefix: &str) -> Self {
        self.options_prefix = Some(prefix.to_owned());
        self
    }

    /// Options store to use instead of [`OptionsDatabase::global`].
    pub fn database(mut self, database: OptionsDatabase) -> Self {
        self.database = Some(database);
        self
    }

    pub fn nullspace(mut self, basis: VectorSpaceBasis) -> Self {
        self.nullspaces.push((NullspaceKind::Operator, basis));
        self
    }

    pub fn transpose_nullspace(mut self, basis: VectorSpaceBasis) -> Self {
        self.nullspaces.push((NullspaceKind::Transpose, basis));
        self
    }

    /// Near null space; validated and stored on the context for engines that consume it. The
    /// built-in preconditioners do not read it.
    pub fn near_nullspace(mut self, basis: VectorSpaceBasis) -> Self {
        self.nullspaces.push((NullspaceKind::Near, basis));
        self
    }

    pub fn pre_jacobian_callback(mut self, f: impl FnMut(&[f64]) -> Result<(), CallbackError> + 'static) -> Self {
        self.callbacks.pre_jacobian = Some(Box::new(f));
        self
    }

    pub fn post_jacobian_callback(
        mut self,
        f: impl FnMut(&[f64], &mut faer::Mat<f64>) -> Result<(), CallbackError> + 'static,
    ) -> Self {
        self.callbacks.post_jacobian = Some(Box::new(f));
        self
    }

    pub fn pre_function_callback(mut self, f: impl FnMut(&[f64]) -> Result<(), CallbackError> + 'static) -> Self {
        self.callbacks.pre_function = Some(Box::new(f));
        self
    }

    pub fn post_function_callback(
        mut self,
        f: impl FnMut(&[f64], &mut [f64]) -> Result<(), CallbackError> + 'static,
    ) -> Self {
        self.callbacks.post_function = Some(Box::new(f));
        self
    }

    /// Assembly service; [`DenseAssembler`] by default.
    pub fn assembler(mut self, assembler: Rc<dyn Assembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Nonlinear engine; [`NewtonEngine`] by default.
    pub fn engine(mut self, engine: Box<dyn NonlinearEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn transfer_manager(mut self, manager: Rc<dyn TransferManager>) -> Self {
        self.transfer_manager = Some(manager);
        self
    }

    /// Attach application data under `key`, readable through [`SolverContext::appctx_value`].
    pub fn appctx(mut self, key: &str, value: impl Any) -> Self {
        self.appctx.insert(key.to_owned(), Rc::new(value));
        self
    }

    pub fn build(self) -> Result<S, VError> {
        let wrap = self.wrap;
        let database = self.database.unwrap_or_else(OptionsDatabase::global);
        let options =
            OptionsManager::new(&self.parameters, &self.defaults, self.options_prefix.as_deref(), database);
        let assembler = self.assembler.unwrap_or_else(|| Rc::new(DenseAssembler::new()));
        let mut ctx = SolverContext::new(self.problem.clone(), assembler, self.callbacks);
        for (kind, basis) in self.nullspaces {
            ctx.set_nullspace(kind, Some(basis))?;
        }
        ctx.set_transfer_manager(self.transfer_manager);
        ctx.set_appctx(self.appctx);

        let mut engine = self.engine.unwrap_or_else(|| Box::new(NewtonEngine::new()));
        {
            let _options = options.inserted_options();
            engine.set_from_options(options.database(), options.options_prefix())?;
        }
        log::debug!("solver {} created with snes_type {}", options.options_prefix(), engine.snes_type());

        let n = self.problem.dm().ndofs();
        Ok(wrap(NonlinearVariationalSolver {
            problem: self.problem,
            options,
            ctx,
            engine,
            work: vec![0.0; n],
            setup: false,
            last_report: None,
        }))
    }
}

/// Solves a [`NonlinearVariationalProblem`] with a [`NonlinearEngine`].
pub struct NonlinearVariationalSolver {
    problem: Rc<NonlinearVariationalProblem>,
    options: OptionsManager,
    ctx: SolverContext,
    engine: Box<dyn NonlinearEngine>,
    work: Vec<f64>,
    setup: bool,
    last_report: Option<SolveReport>,
}

impl NonlinearVariationalSolver {
    pub fn builder(problem: &Rc<NonlinearVariationalProblem>) -> SolverBuilder<Self> {
        SolverBuilder::new(problem.clone(), default_snes_parameters(), |s| s)
    }

    /// Solve the problem, optionally subject to `lower ≤ u ≤ upper`.
    ///
    /// On success the unknown holds the converged solution. On failure it is left as it was after
    /// the Dirichlet conditions were applied; a rejected bounds request leaves it untouched.
    pub fn solve(&mut self, bounds: Option<(&Function, &Function)>) -> Result<(), VError> {
        let u = self.problem.unknown().clone();
        let n = u.len();
        if let Some((lower, upper)) = bounds {
            if !self.engine.snes_type().supports_bounds() {
                return Err(VError::ConfigurationError(format!(
                    "bounds need a bound-constrained snes_type (vinewtonrsls or vinewtonssls), not {}",
                    self.engine.snes_type()
                )));
            }
            for b in [lower, upper] {
                if b.len() != n {
                    return Err(VError::DimensionMismatch { expected: n, found: b.len() });
                }
            }
        }

        for bc in self.problem.dirichlet_bcs() {
            bc.apply(&u)?;
        }
        match bounds {
            Some((lower, upper)) => self.engine.set_variable_bounds(lower.to_vec(), upper.to_vec())?,
            None => self.engine.clear_variable_bounds(),
        }

        let snapshot = u.to_vec();
        self.work.clear();
        self.work.extend_from_slice(&snapshot);
        let outcome = {
            let _options = self.options.inserted_options();
            self.engine
                .set_from_options(self.options.database(), self.options.options_prefix())
                .and_then(|()| self.engine.solve(&mut self.ctx, &mut self.work))
        };
        self.setup = true;

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                u.assign(&snapshot)?;
                return Err(e);
            }
        };
        self.last_report = Some(report.clone());
        if report.reason.is_converged() {
            u.assign(&self.work)?;
            Ok(())
        } else {
            u.assign(&snapshot)?;
            Err(VError::ConvergenceFailure { reason: report.reason, iterations: report.iterations })
        }
    }

    /// Attach transfer operators for multigrid. Only allowed before the first solve.
    pub fn set_transfer_manager(&mut self, manager: Option<Rc<dyn TransferManager>>) -> Result<(), VError> {
        if self.setup {
            return Err(VError::InvalidState("the transfer manager cannot be changed after a solve"));
        }
        self.ctx.set_transfer_manager(manager);
        Ok(())
    }

    /// Fill or clear one of the three null-space slots.
    pub fn set_nullspace(&mut self, kind: NullspaceKind, basis: Option<VectorSpaceBasis>) -> Result<(), VError> {
        self.ctx.set_nullspace(kind, basis)
    }

    pub fn problem(&self) -> &Rc<NonlinearVariationalProblem> {
        &self.problem
    }

    /// Merged solver parameters.
    pub fn parameters(&self) -> &SolverParameters {
        self.options.parameters()
    }

    pub fn options_prefix(&self) -> &str {
        self.options.options_prefix()
    }

    pub fn snes_type(&self) -> SnesType {
        self.engine.snes_type()
    }

    /// Report of the most recent engine run.
    pub fn last_report(&self) -> Option<&SolveReport> {
        self.last_report.as_ref()
    }

    /// Nonlinear iterations of the most recent solve, 0 before the first.
    pub fn iterations(&self) -> usize {
        self.last_report.as_ref().map_or(0, |r| r.iterations)
    }

    pub fn context(&self) -> &SolverContext {
        &self.ctx
    }

    /// True once at least one solve has run.
    pub fn is_setup(&self) -> bool {
        self.setup
    }

    pub(crate) fn context_mut(&mut self) -> &mut SolverContext {
        &mut self.ctx
    }
}

impl std::fmt::Debug for NonlinearVariationalSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonlinearVariationalSolver")
            .field("options_prefix", &self.options.options_prefix())
            .field("snes_type", &self.engine.snes_type())
            .field("setup", &self.setup)
            .field("last_report", &self.last_report)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcs::DirichletBC;
    use crate::config::OptionValue;
    use crate::engine::ConvergedReason;
    use crate::form::{Form, LinearKernel};
    use crate::function::FunctionSpace;
    use approx::assert_abs_diff_eq;
    use faer::Mat;

    /// `u_i³ + u_i − 2 = 0` away from the boundary, with an explicit Jacobian.
    fn cubic_problem(n: usize) -> (Function, Rc<NonlinearVariationalProblem>) {
        let v = FunctionSpace::interval(n);
        let u = Function::named(&v, "u");
        let (uf, uj) = (u.clone(), u.clone());
        let f = LinearKernel::new("F", &v, move || uf.values().iter().map(|x| x * x * x + x - 2.0).collect())
            .with_derivative(&u, move || {
                let x = uj.values();
                Mat::from_fn(x.len(), x.len(), |i, j| if i == j { 3.0 * x[i] * x[i] + 1.0 } else { 0.0 })
            });
        let p = NonlinearVariationalProblem::builder(Form::linear(f), &u)
            .bc(DirichletBC::new(&v, 0.0, 1))
            .build()
            .unwrap();
        (u, p)
    }

    #[test]
    fn defaults_merge_under_explicit_parameters() {
        let (_, p) = cubic_problem(4);
        let s = NonlinearVariationalSolver::builder(&p)
            .database(OptionsDatabase::new())
            .solver_parameters(crate::parameters! { "ksp_rtol" => 1e-9 })
            .build()
            .unwrap();
        assert_eq!(s.parameters().get("ksp_rtol"), Some(&OptionValue::Real(1e-9)));
        assert_eq!(s.parameters().get("snes_type"), Some(&OptionValue::Str("newtonls".into())));
        assert_eq!(s.parameters().get("pc_type"), Some(&OptionValue::Str("lu".into())));
        assert!(s.options_prefix().starts_with("varsolve_"));
        assert_eq!(s.snes_type(), SnesType::NewtonLs);
    }

    #[test]
    fn solves_and_keeps_the_boundary_value() {
        let (u, p) = cubic_problem(5);
        let db = OptionsDatabase::new();
        let mut s = NonlinearVariationalSolver::builder(&p).database(db.clone()).build().unwrap();
        s.solve(None).unwrap();
        let x = u.to_vec();
        assert_eq!(x[0], 0.0);
        for xi in &x[1..] {
            assert_abs_diff_eq!(*xi, 1.0, epsilon = 1e-6);
        }
        assert!(s.last_report().unwrap().reason.is_converged());
        // the scope removed everything it installed
        assert!(db.is_empty());
    }

    #[test]
    fn zero_iterations_restore_the_snapshot() {
        let (u, p) = cubic_problem(4);
        u.assign(&[5.0, 0.5, 0.5, 0.5]).unwrap();
        let mut s = NonlinearVariationalSolver::builder(&p)
            .database(OptionsDatabase::new())
            .solver_parameters(crate::parameters! { "snes_max_it" => 0 })
            .build()
            .unwrap();
        let err = s.solve(None).unwrap_err();
        assert!(matches!(err, VError::ConvergenceFailure { reason: ConvergedReason::DivergedMaxIts, .. }));
        // the Dirichlet value was applied before the snapshot
        assert_eq!(u.to_vec(), vec![0.0, 0.5, 0.5, 0.5]);
        assert!(s.is_setup());
    }

    #[test]
    fn appctx_entries_reach_the_context() {
        let (_, p) = cubic_problem(3);
        let s = NonlinearVariationalSolver::builder(&p)
            .database(OptionsDatabase::new())
            .appctx("viscosity", 0.25_f64)
            .appctx("label", String::from("cubic"))
            .build()
            .unwrap();
        let ctx = s.context();
        assert_eq!(ctx.appctx().len(), 2);
        assert_eq!(ctx.appctx_value::<f64>("viscosity"), Some(&0.25));
        assert_eq!(ctx.appctx_value::<String>("label").map(String::as_str), Some("cubic"));
        // wrong type or missing key
        assert!(ctx.appctx_value::<i64>("viscosity").is_none());
        assert!(ctx.appctx_value::<f64>("density").is_none());
    }

    #[test]
    fn near_nullspace_is_stored_without_changing_the_solve() {
        let (u, p) = cubic_problem(4);
        let mut plain = NonlinearVariationalSolver::builder(&p).database(OptionsDatabase::new()).build().unwrap();
        plain.solve(None).unwrap();
        let expected = u.to_vec();

        u.assign(&[0.0; 4]).unwrap();
        let near = VectorSpaceBasis::constant();
        let mut s = NonlinearVariationalSolver::builder(&p)
            .database(OptionsDatabase::new())
            .near_nullspace(near.clone())
            .build()
            .unwrap();
        assert_eq!(s.context().nullspaces().near.as_ref(), Some(&near));
        assert!(s.context().nullspaces().nullspace.is_none());
        s.solve(None).unwrap();
        assert_eq!(u.to_vec(), expected);
        assert_eq!(s.last_report().unwrap().iterations, plain.last_report().unwrap().iterations);

        let wrong = VectorSpaceBasis::new(vec![vec![1.0; 3]]);
        let built = NonlinearVariationalSolver::builder(&p).database(OptionsDatabase::new()).near_nullspace(wrong).build();
        assert!(matches!(built, Err(VError::ConfigurationError(_))));
    }

    #[test]
    fn transfer_manager_is_fixed_after_the_first_solve() {
        let (_, p) = cubic_problem(3);
        let mut s = NonlinearVariationalSolver::builder(&p).database(OptionsDatabase::new()).build().unwrap();
        s.set_transfer_manager(None).unwrap();
        s.solve(None).unwrap();
        assert!(matches!(s.set_transfer_manager(None), Err(VError::InvalidState(_))));
    }
}
