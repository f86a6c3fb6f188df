//! The nonlinear-engine seam (SNES-style) and its default Newton implementation.
//!
//! The orchestration layer never iterates itself. It hands a [`SnesFunction`] (the solver
//! context) to a [`NonlinearEngine`], which calls back for residuals and Jacobians at trial
//! iterates and reports a [`ConvergedReason`].
//!
//! # References
//! - PETSc SNES documentation: https://petsc.org/release/manualpages/SNES/
//! - Benson & Munson (2006), Flexible complementarity solvers for large-scale applications.

use std::fmt;
use std::str::FromStr;

use faer::Mat;

use crate::config::OptionsDatabase;
use crate::context::nullspace::{NullspaceKind, VectorSpaceBasis};
use crate::context::transfer::TransferManager;
use crate::error::VError;

pub mod ksp;
pub mod newton;

pub use ksp::{KspSettings, KspType, LinearSolveStats, PcType};
pub use newton::NewtonEngine;

/// Nonlinear solver variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnesType {
    /// Newton with line search.
    NewtonLs,
    /// A single linearised solve.
    KspOnly,
    /// Reduced-space active-set Newton for bound constraints.
    ViNewtonRsLs,
    /// Semismooth Newton for bound constraints.
    ViNewtonSsLs,
}

impl SnesType {
    /// Whether the variant accepts variable bounds.
    pub fn supports_bounds(self) -> bool {
        matches!(self, SnesType::ViNewtonRsLs | SnesType::ViNewtonSsLs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SnesType::NewtonLs => "newtonls",
            SnesType::KspOnly => "ksponly",
            SnesType::ViNewtonRsLs => "vinewtonrsls",
            SnesType::ViNewtonSsLs => "vinewtonssls",
        }
    }
}

impl fmt::Display for SnesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnesType {
    type Err = VError;
    fn from_str(s: &str) -> Result<Self, VError> {
        match s {
            "newtonls" => Ok(SnesType::NewtonLs),
            "ksponly" => Ok(SnesType::KspOnly),
            "vinewtonrsls" => Ok(SnesType::ViNewtonRsLs),
            "vinewtonssls" => Ok(SnesType::ViNewtonSsLs),
            other => Err(VError::InvalidOption { key: "snes_type".into(), value: other.into() }),
        }
    }
}

/// Line-search strategy for Newton steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearch {
    /// Full step.
    Basic,
    /// Backtracking with a sufficient-decrease test.
    Backtracking,
}

impl FromStr for LineSearch {
    type Err = VError;
    fn from_str(s: &str) -> Result<Self, VError> {
        match s {
            "basic" | "none" => Ok(LineSearch::Basic),
            "bt" => Ok(LineSearch::Backtracking),
            other => Err(VError::InvalidOption { key: "snes_linesearch_type".into(), value: other.into() }),
        }
    }
}

/// Why the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergedReason {
    ConvergedFnormAbs,
    ConvergedFnormRelative,
    ConvergedSnormRelative,
    /// Fixed number of iterations completed (`ksponly`).
    ConvergedIts,
    DivergedMaxIts,
    DivergedLineSearch,
    /// The inner linear solve failed.
    DivergedLinearSolve,
    DivergedFnormNan,
    DivergedBreakdown,
    Other(i32),
}

/// Coarse classification of a [`ConvergedReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonKind {
    ConvergedOk,
    DivergedMaxIterations,
    DivergedLineSearch,
    DivergedBreakdown,
    DivergedNan,
    Other,
}

impl ConvergedReason {
    pub fn is_converged(self) -> bool {
        self.kind() == ReasonKind::ConvergedOk
    }

    pub fn kind(self) -> ReasonKind {
        match self {
            ConvergedReason::ConvergedFnormAbs
            | ConvergedReason::ConvergedFnormRelative
            | ConvergedReason::ConvergedSnormRelative
            | ConvergedReason::ConvergedIts => ReasonKind::ConvergedOk,
            ConvergedReason::DivergedMaxIts => ReasonKind::DivergedMaxIterations,
            ConvergedReason::DivergedLineSearch => ReasonKind::DivergedLineSearch,
            ConvergedReason::DivergedLinearSolve | ConvergedReason::DivergedBreakdown => {
                ReasonKind::DivergedBreakdown
            }
            ConvergedReason::DivergedFnormNan => ReasonKind::DivergedNan,
            ConvergedReason::Other(_) => ReasonKind::Other,
        }
    }
}

impl fmt::Display for ConvergedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConvergedReason::ConvergedFnormAbs => "CONVERGED_FNORM_ABS",
            ConvergedReason::ConvergedFnormRelative => "CONVERGED_FNORM_RELATIVE",
            ConvergedReason::ConvergedSnormRelative => "CONVERGED_SNORM_RELATIVE",
            ConvergedReason::ConvergedIts => "CONVERGED_ITS",
            ConvergedReason::DivergedMaxIts => "DIVERGED_MAX_IT",
            ConvergedReason::DivergedLineSearch => "DIVERGED_LINE_SEARCH",
            ConvergedReason::DivergedLinearSolve => "DIVERGED_LINEAR_SOLVE",
            ConvergedReason::DivergedFnormNan => "DIVERGED_FNORM_NAN",
            ConvergedReason::DivergedBreakdown => "DIVERGED_BREAKDOWN",
            ConvergedReason::Other(code) => return write!(f, "OTHER({code})"),
        };
        f.write_str(s)
    }
}

/// Outcome of one engine run.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub reason: ConvergedReason,
    pub iterations: usize,
    pub function_norm: f64,
    pub linear_iterations: usize,
}

/// Operator pair returned by a Jacobian evaluation.
pub struct JacobianPair<'a> {
    pub jacobian: &'a Mat<f64>,
    /// Matrix to build the preconditioner from; the Jacobian itself if none was given.
    pub preconditioner: &'a Mat<f64>,
}

/// Callback surface the engine evaluates during iteration.
pub trait SnesFunction {
    /// Number of unknowns.
    fn size(&self) -> usize;

    /// Residual at `x`, written into `f`.
    fn form_function(&mut self, x: &[f64], f: &mut [f64]) -> Result<(), VError>;

    /// Assemble the Jacobian (and preconditioning matrix) at `x`.
    fn form_jacobian(&mut self, x: &[f64]) -> Result<(), VError>;

    /// Operators from the last [`SnesFunction::form_jacobian`].
    fn jacobian(&self) -> JacobianPair<'_>;

    fn nullspace(&self, kind: NullspaceKind) -> Option<&VectorSpaceBasis>;

    fn transfer_manager(&self) -> Option<&dyn TransferManager>;
}

/// A stateful nonlinear solver driven through callbacks.
pub trait NonlinearEngine {
    /// (Re)read configuration from `db` under `prefix`.
    fn set_from_options(&mut self, db: &OptionsDatabase, prefix: &str) -> Result<(), VError>;

    fn snes_type(&self) -> SnesType;

    /// Install lower/upper bounds for the next solves.
    fn set_variable_bounds(&mut self, lower: Vec<f64>, upper: Vec<f64>) -> Result<(), VError>;

    fn clear_variable_bounds(&mut self);

    /// Iterate from `x` in place until convergence or failure.
    ///
    /// Non-convergence is reported through [`SolveReport::reason`]; `Err` is reserved for
    /// failures inside callbacks or invalid configuration.
    fn solve(&mut self, function: &mut dyn SnesFunction, x: &mut [f64]) -> Result<SolveReport, VError>;
}
