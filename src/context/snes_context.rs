//! The callback target of the nonlinear engine.
//!
//! A [`SolverContext`] is bound to one problem for the lifetime of its solver. It owns the
//! assembled residual and operator buffers, the null-space slots, the user hooks that run around
//! each evaluation, the optional transfer operators and an application context of named values.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use faer::Mat;

use crate::assembly::Assembler;
use crate::bcs::{BoundaryCondition, EquationBC};
use crate::context::nullspace::{NullspaceKind, Nullspaces, VectorSpaceBasis};
use crate::context::transfer::TransferManager;
use crate::core::wrappers::all_finite;
use crate::engine::{JacobianPair, SnesFunction};
use crate::error::{CallbackError, VError};
use crate::form::Form;
use crate::problem::NonlinearVariationalProblem;

bitflags! {
    /// Which cached operators are valid.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct AssemblyState: u8 {
        const JACOBIAN       = 0b01;
        const PRECONDITIONER = 0b10;
    }
}

/// Hook run with the trial iterate before an evaluation.
pub type PreCallback = Box<dyn FnMut(&[f64]) -> Result<(), CallbackError>>;
/// Hook that may modify the assembled operator.
pub type PostJacobianCallback = Box<dyn FnMut(&[f64], &mut Mat<f64>) -> Result<(), CallbackError>>;
/// Hook that may modify the assembled residual.
pub type PostFunctionCallback = Box<dyn FnMut(&[f64], &mut [f64]) -> Result<(), CallbackError>>;

/// The four optional evaluation hooks.
#[derive(Default)]
pub struct SolverCallbacks {
    pub pre_jacobian: Option<PreCallback>,
    pub post_jacobian: Option<PostJacobianCallback>,
    pub pre_function: Option<PreCallback>,
    pub post_function: Option<PostFunctionCallback>,
}

impl fmt::Debug for SolverCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverCallbacks")
            .field("pre_jacobian", &self.pre_jacobian.is_some())
            .field("post_jacobian", &self.post_jacobian.is_some())
            .field("pre_function", &self.pre_function.is_some())
            .field("post_function", &self.post_function.is_some())
            .finish()
    }
}

/// Application data attached to a solver, keyed by name.
pub type AppContext = BTreeMap<String, Rc<dyn Any>>;

/// Residual/Jacobian evaluator bound to one problem.
pub struct SolverContext {
    problem: Rc<NonlinearVariationalProblem>,
    assembler: Rc<dyn Assembler>,
    assembled: AssemblyState,
    jacobian: Mat<f64>,
    pjacobian: Option<Mat<f64>>,
    residual: Vec<f64>,
    nullspaces: Nullspaces,
    callbacks: SolverCallbacks,
    transfer_manager: Option<Rc<dyn TransferManager>>,
    appctx: AppContext,
    residual_evaluations: usize,
    jacobian_assemblies: usize,
}

// Equation conditions in insertion order, nested ones after their parent.
fn equation_bcs(bcs: &[BoundaryCondition], out: &mut Vec<EquationBC>) {
    for bc in bcs {
        if let BoundaryCondition::Equation(e) = bc {
            out.push(e.clone());
            equation_bcs(e.bcs(), out);
        }
    }
}

fn replace_rows(target: &mut Mat<f64>, source: &Mat<f64>, rows: &[usize]) {
    for &i in rows {
        for j in 0..target.ncols() {
            target[(i, j)] = source[(i, j)];
        }
    }
}

fn identity_rows(target: &mut Mat<f64>, rows: &[usize]) {
    for &i in rows {
        for j in 0..target.ncols() {
            target[(i, j)] = 0.0;
        }
        target[(i, i)] = 1.0;
    }
}

/// Assemble `form` and impose the boundary rows of `problem` on it.
fn assemble_operator(
    assembler: &dyn Assembler,
    problem: &NonlinearVariationalProblem,
    form: &Form,
    into: &mut Mat<f64>,
) -> Result<(), VError> {
    assembler.assemble_matrix(form, into)?;
    let mut eqs = Vec::new();
    equation_bcs(problem.bcs(), &mut eqs);
    for eq in &eqs {
        let rows = assembler.matrix(eq.jacobian_form())?;
        replace_rows(into, &rows, eq.nodes());
    }
    for bc in problem.dirichlet_bcs() {
        identity_rows(into, bc.nodes());
    }
    Ok(())
}

impl SolverContext {
    pub fn new(
        problem: Rc<NonlinearVariationalProblem>,
        assembler: Rc<dyn Assembler>,
        callbacks: SolverCallbacks,
    ) -> Self {
        let n = problem.dm().ndofs();
        Self {
            problem,
            assembler,
            assembled: AssemblyState::empty(),
            jacobian: Mat::zeros(n, n),
            pjacobian: None,
            residual: vec![0.0; n],
            nullspaces: Nullspaces::default(),
            callbacks,
            transfer_manager: None,
            appctx: AppContext::new(),
            residual_evaluations: 0,
            jacobian_assemblies: 0,
        }
    }

    pub fn problem(&self) -> &Rc<NonlinearVariationalProblem> {
        &self.problem
    }

    pub fn assembled(&self) -> AssemblyState {
        self.assembled
    }

    pub fn is_jacobian_assembled(&self) -> bool {
        self.assembled.contains(AssemblyState::JACOBIAN)
    }

    /// Number of residual assemblies so far.
    pub fn residual_evaluations(&self) -> usize {
        self.residual_evaluations
    }

    /// Number of Jacobian assemblies so far; cache hits are not counted.
    pub fn jacobian_assemblies(&self) -> usize {
        self.jacobian_assemblies
    }

    // Kernels and hooks read the unknown, so it must hold the trial iterate.
    fn set_iterate(&self, x: &[f64]) -> Result<(), VError> {
        let u = self.problem.unknown();
        let same = *u.values() == x;
        if same { Ok(()) } else { u.assign(x) }
    }

    /// Assemble the residual at `x` with boundary rows imposed.
    pub fn evaluate_residual(&mut self, x: &[f64]) -> Result<&[f64], VError> {
        self.set_iterate(x)?;
        if let Some(cb) = self.callbacks.pre_function.as_mut() {
            cb(x).map_err(VError::Callback)?;
        }
        let problem = &*self.problem;
        self.assembler.assemble_vector(problem.residual(), &mut self.residual)?;

        let mut eqs = Vec::new();
        equation_bcs(problem.bcs(), &mut eqs);
        for eq in &eqs {
            let rows = self.assembler.vector(eq.residual_form())?;
            for &i in eq.nodes() {
                self.residual[i] = rows[i];
            }
        }
        for bc in problem.dirichlet_bcs() {
            for (i, g) in bc.values() {
                self.residual[i] = x[i] - g;
            }
        }

        if let Some(cb) = self.callbacks.post_function.as_mut() {
            cb(x, &mut self.residual).map_err(VError::Callback)?;
        }
        if !all_finite(&self.residual) {
            log::warn!("non-finite entries in the residual of '{}'", problem.unknown().name());
        }
        self.residual_evaluations += 1;
        Ok(&self.residual)
    }

    /// Assemble the Jacobian at `x`, or return the cached one for a constant-Jacobian problem.
    pub fn evaluate_jacobian(&mut self, x: &[f64]) -> Result<&Mat<f64>, VError> {
        let problem = &*self.problem;
        let needed = if problem.jp_eq_j() {
            AssemblyState::JACOBIAN
        } else {
            AssemblyState::JACOBIAN | AssemblyState::PRECONDITIONER
        };
        if problem.constant_jacobian() && self.assembled.contains(needed) {
            log::debug!("reusing constant Jacobian");
            return Ok(&self.jacobian);
        }

        self.set_iterate(x)?;
        if let Some(cb) = self.callbacks.pre_jacobian.as_mut() {
            cb(x).map_err(VError::Callback)?;
        }
        assemble_operator(&*self.assembler, problem, problem.jacobian(), &mut self.jacobian)?;
        if let Some(jp) = problem.preconditioner() {
            let n = self.jacobian.nrows();
            let pmat = self.pjacobian.get_or_insert_with(|| Mat::zeros(n, n));
            assemble_operator(&*self.assembler, problem, jp, pmat)?;
        }
        if let Some(cb) = self.callbacks.post_jacobian.as_mut() {
            cb(x, &mut self.jacobian).map_err(VError::Callback)?;
        }
        self.assembled |= needed;
        self.jacobian_assemblies += 1;
        log::debug!("assembled Jacobian #{}", self.jacobian_assemblies);
        Ok(&self.jacobian)
    }

    /// Force reassembly at the next Jacobian evaluation.
    pub fn invalidate_jacobian(&mut self) {
        self.assembled = AssemblyState::empty();
    }

    /// Fill or clear one null-space slot. The basis must match the system size and be orthonormal.
    pub fn set_nullspace(&mut self, kind: NullspaceKind, basis: Option<VectorSpaceBasis>) -> Result<(), VError> {
        if let Some(b) = &basis {
            b.validate(self.problem.dm().ndofs())?;
        }
        *self.nullspaces.slot_mut(kind) = basis;
        Ok(())
    }

    pub fn nullspaces(&self) -> &Nullspaces {
        &self.nullspaces
    }

    pub(crate) fn set_transfer_manager(&mut self, manager: Option<Rc<dyn TransferManager>>) {
        self.transfer_manager = manager;
    }

    pub fn has_transfer_manager(&self) -> bool {
        self.transfer_manager.is_some()
    }

    pub fn appctx(&self) -> &AppContext {
        &self.appctx
    }

    /// Entry `key` of the application context, if present and of type `T`.
    pub fn appctx_value<T: 'static>(&self, key: &str) -> Option<&T> {
        self.appctx.get(key)?.downcast_ref::<T>()
    }

    pub(crate) fn set_appctx(&mut self, appctx: AppContext) {
        self.appctx = appctx;
    }
}

impl SnesFunction for SolverContext {
    fn size(&self) -> usize {
        self.problem.dm().ndofs()
    }

    fn form_function(&mut self, x: &[f64], f: &mut [f64]) -> Result<(), VError> {
        let r = self.evaluate_residual(x)?;
        if r.len() != f.len() {
            return Err(VError::DimensionMismatch { expected: f.len(), found: r.len() });
        }
        f.copy_from_slice(r);
        Ok(())
    }

    fn form_jacobian(&mut self, x: &[f64]) -> Result<(), VError> {
        self.evaluate_jacobian(x).map(|_| ())
    }

    fn jacobian(&self) -> JacobianPair<'_> {
        JacobianPair {
            jacobian: &self.jacobian,
            preconditioner: self.pjacobian.as_ref().unwrap_or(&self.jacobian),
        }
    }

    fn nullspace(&self, kind: NullspaceKind) -> Option<&VectorSpaceBasis> {
        self.nullspaces.get(kind)
    }

    fn transfer_manager(&self) -> Option<&dyn TransferManager> {
        self.transfer_manager.as_deref()
    }
}

impl fmt::Debug for SolverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverContext")
            .field("problem", &self.problem)
            .field("assembled", &self.assembled)
            .field("nullspaces", &self.nullspaces)
            .field("callbacks", &self.callbacks)
            .field("transfer_manager", &self.transfer_manager.is_some())
            .field("appctx", &self.appctx.keys().collect::<Vec<_>>())
            .finish()
    }
}
