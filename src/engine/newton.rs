//! Newton's method with line search, a single-step linear variant, and an active-set variant for
//! bound constraints.
//!
//! Each iteration solves `J δ = F(x)` and updates `x ← x − λ δ`. Convergence is tested on the
//! residual norm (absolute and relative to the initial norm) and on the step length relative to
//! `‖x‖`. With bounds installed the iterate is kept feasible by projection and rows in the active
//! set (`x` on a bound with `F` pushing outward) are frozen for the step.
//!
//! # References
//! - Kelley, C. T. (2003). Solving Nonlinear Equations with Newton's Method. SIAM.
//! - Dennis & Schnabel (1996). Numerical Methods for Unconstrained Optimization. §6.3

use crate::config::OptionsDatabase;
use crate::context::nullspace::NullspaceKind;
use crate::core::wrappers::norm2;
use crate::error::VError;

use super::ksp::{KspSettings, LinearSolveStats, LinearSystem};
use super::{ConvergedReason, LineSearch, NonlinearEngine, SnesFunction, SnesType, SolveReport};

const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 10;

/// Default [`NonlinearEngine`].
#[derive(Debug, Clone)]
pub struct NewtonEngine {
    pub snes_type: SnesType,
    pub line_search: LineSearch,
    pub max_it: usize,
    pub atol: f64,
    pub rtol: f64,
    pub stol: f64,
    /// Log the residual norm every iteration.
    pub monitor: bool,
    pub ksp: KspSettings,
    bounds: Option<(Vec<f64>, Vec<f64>)>,
}

impl Default for NewtonEngine {
    fn default() -> Self {
        Self {
            snes_type: SnesType::NewtonLs,
            line_search: LineSearch::Basic,
            max_it: 50,
            atol: 1e-50,
            rtol: 1e-8,
            stol: 1e-8,
            monitor: false,
            ksp: KspSettings::default(),
            bounds: None,
        }
    }
}

fn to_usize(key: &str, v: i64) -> Result<usize, VError> {
    usize::try_from(v).map_err(|_| VError::InvalidOption { key: key.to_owned(), value: v.to_string() })
}

impl NewtonEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn monitor(&self, it: usize, fnorm: f64) {
        if self.monitor {
            log::info!("{it:3} SNES Function norm {fnorm:.12e}");
        }
    }

    fn project(&self, x: &mut [f64]) {
        if let Some((lo, hi)) = &self.bounds {
            for ((xi, l), h) in x.iter_mut().zip(lo).zip(hi) {
                *xi = xi.clamp(*l, *h);
            }
        }
    }

    /// Rows pinned to a bound for the next step, or `None` without bounds.
    fn active_set(&self, x: &[f64], f: &[f64]) -> Option<Vec<bool>> {
        let (lo, hi) = self.bounds.as_ref()?;
        Some(
            (0..x.len())
                .map(|i| (x[i] <= lo[i] && f[i] > 0.0) || (x[i] >= hi[i] && f[i] < 0.0))
                .collect(),
        )
    }

    /// Residual norm over the free rows.
    fn merit(&self, x: &[f64], f: &[f64]) -> f64 {
        match self.active_set(x, f) {
            None => norm2(f),
            Some(active) => f
                .iter()
                .zip(&active)
                .filter(|(_, a)| !**a)
                .map(|(fi, _)| fi * fi)
                .sum::<f64>()
                .sqrt(),
        }
    }

    /// Solve `J δ = F` at the last assembled Jacobian, freezing active rows.
    fn direction(
        &self,
        function: &dyn SnesFunction,
        x: &[f64],
        f: &[f64],
        dx: &mut [f64],
    ) -> Result<LinearSolveStats, VError> {
        let pair = function.jacobian();
        let nullspace = function.nullspace(NullspaceKind::Operator);
        let transpose_nullspace = function.nullspace(NullspaceKind::Transpose);
        let transfer = function.transfer_manager();
        match self.active_set(x, f) {
            Some(active) if active.iter().any(|a| *a) => {
                let mut jac = pair.jacobian.clone();
                let mut pmat = pair.preconditioner.clone();
                let mut rhs = f.to_vec();
                for (i, _) in active.iter().enumerate().filter(|(_, a)| **a) {
                    for j in 0..jac.ncols() {
                        jac[(i, j)] = 0.0;
                        pmat[(i, j)] = 0.0;
                    }
                    jac[(i, i)] = 1.0;
                    pmat[(i, i)] = 1.0;
                    rhs[i] = 0.0;
                }
                let system = LinearSystem {
                    operator: &jac,
                    preconditioner: &pmat,
                    nullspace,
                    transpose_nullspace,
                    transfer,
                };
                self.ksp.solve(&system, &rhs, dx)
            }
            _ => {
                let system = LinearSystem {
                    operator: pair.jacobian,
                    preconditioner: pair.preconditioner,
                    nullspace,
                    transpose_nullspace,
                    transfer,
                };
                self.ksp.solve(&system, f, dx)
            }
        }
    }

    /// Assemble and solve for the Newton direction; `Ok(None)` when the linear solve failed.
    fn newton_step(
        &self,
        function: &mut dyn SnesFunction,
        x: &[f64],
        f: &[f64],
        dx: &mut [f64],
    ) -> Result<Option<LinearSolveStats>, VError> {
        function.form_jacobian(x)?;
        match self.direction(&*function, x, f, dx) {
            Ok(stats) if stats.converged => Ok(Some(stats)),
            Ok(stats) => {
                log::warn!(
                    "linear solve did not converge: {} iterations, residual {:.3e}",
                    stats.iterations,
                    stats.residual_norm
                );
                Ok(None)
            }
            Err(VError::LinearSolve(msg)) => {
                log::warn!("linear solve failed: {msg}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn report(&self, reason: ConvergedReason, iterations: usize, function_norm: f64, linear: usize) -> SolveReport {
        log::debug!("{} stopped with {reason} after {iterations} iterations", self.snes_type);
        SolveReport { reason, iterations, function_norm, linear_iterations: linear }
    }
}

impl NonlinearEngine for NewtonEngine {
    fn set_from_options(&mut self, db: &OptionsDatabase, prefix: &str) -> Result<(), VError> {
        for (name, value) in db.get_all(prefix) {
            let key = format!("{prefix}{name}");
            let text = value.to_string();
            match name.as_str() {
                "snes_type" => self.snes_type = text.parse()?,
                "snes_linesearch_type" => self.line_search = text.parse()?,
                "snes_max_it" => {
                    if let Some(v) = db.get_int(&key)? {
                        self.max_it = to_usize(&key, v)?;
                    }
                }
                "snes_atol" => self.atol = db.get_real(&key)?.unwrap_or(self.atol),
                "snes_rtol" => self.rtol = db.get_real(&key)?.unwrap_or(self.rtol),
                "snes_stol" => self.stol = db.get_real(&key)?.unwrap_or(self.stol),
                "snes_monitor" => self.monitor = db.get_bool(&key)?.unwrap_or(true),
                "ksp_type" => self.ksp.ksp_type = text.parse()?,
                "pc_type" => self.ksp.pc_type = text.parse()?,
                "ksp_rtol" => self.ksp.rtol = db.get_real(&key)?.unwrap_or(self.ksp.rtol),
                "ksp_atol" => self.ksp.atol = db.get_real(&key)?.unwrap_or(self.ksp.atol),
                "ksp_max_it" => {
                    if let Some(v) = db.get_int(&key)? {
                        self.ksp.max_it = to_usize(&key, v)?;
                    }
                }
                "ksp_gmres_restart" => {
                    if let Some(v) = db.get_int(&key)? {
                        self.ksp.restart = to_usize(&key, v)?;
                    }
                }
                "ksp_monitor" => self.ksp.monitor = db.get_bool(&key)?.unwrap_or(true),
                // All storage is dense; the sparse formats are accepted as synonyms.
                "mat_type" => match text.as_str() {
                    "aij" | "baij" | "dense" => {}
                    _ => return Err(VError::InvalidOption { key, value: text }),
                },
                _ => log::warn!("option {key} was set but is not used by {}", self.snes_type),
            }
        }
        if self.bounds.is_some() && !self.snes_type.supports_bounds() {
            return Err(VError::ConfigurationError(format!(
                "variable bounds are installed but snes_type {} does not support them",
                self.snes_type
            )));
        }
        Ok(())
    }

    fn snes_type(&self) -> SnesType {
        self.snes_type
    }

    fn set_variable_bounds(&mut self, lower: Vec<f64>, upper: Vec<f64>) -> Result<(), VError> {
        if !self.snes_type.supports_bounds() {
            return Err(VError::ConfigurationError(format!(
                "snes_type {} does not support variable bounds; use vinewtonrsls or vinewtonssls",
                self.snes_type
            )));
        }
        if lower.len() != upper.len() {
            return Err(VError::DimensionMismatch { expected: lower.len(), found: upper.len() });
        }
        if lower.iter().zip(&upper).any(|(l, h)| l > h) {
            return Err(VError::ConfigurationError("lower bound exceeds upper bound".into()));
        }
        self.bounds = Some((lower, upper));
        Ok(())
    }

    fn clear_variable_bounds(&mut self) {
        self.bounds = None;
    }

    fn solve(&mut self, function: &mut dyn SnesFunction, x: &mut [f64]) -> Result<SolveReport, VError> {
        let n = x.len();
        if function.size() != n {
            return Err(VError::DimensionMismatch { expected: function.size(), found: n });
        }
        if let Some((lo, _)) = &self.bounds {
            if lo.len() != n {
                return Err(VError::DimensionMismatch { expected: n, found: lo.len() });
            }
        }
        self.project(x);

        let mut f = vec![0.0; n];
        let mut dx = vec![0.0; n];
        let mut linear_its = 0;
        function.form_function(x, &mut f)?;
        let mut fnorm = self.merit(x, &f);
        self.monitor(0, fnorm);
        if !fnorm.is_finite() {
            return Ok(self.report(ConvergedReason::DivergedFnormNan, 0, fnorm, 0));
        }
        if fnorm <= self.atol {
            return Ok(self.report(ConvergedReason::ConvergedFnormAbs, 0, fnorm, 0));
        }

        if self.snes_type == SnesType::KspOnly {
            if self.max_it == 0 {
                return Ok(self.report(ConvergedReason::DivergedMaxIts, 0, fnorm, 0));
            }
            let Some(stats) = self.newton_step(function, x, &f, &mut dx)? else {
                return Ok(self.report(ConvergedReason::DivergedLinearSolve, 0, fnorm, 0));
            };
            for (xi, di) in x.iter_mut().zip(&dx) {
                *xi -= di;
            }
            function.form_function(x, &mut f)?;
            let fnorm = norm2(&f);
            self.monitor(1, fnorm);
            return Ok(self.report(ConvergedReason::ConvergedIts, 1, fnorm, stats.iterations));
        }

        let fnorm0 = fnorm;
        let mut trial = vec![0.0; n];
        let mut f_trial = vec![0.0; n];
        for it in 1..=self.max_it {
            let Some(stats) = self.newton_step(function, x, &f, &mut dx)? else {
                return Ok(self.report(ConvergedReason::DivergedLinearSolve, it - 1, fnorm, linear_its));
            };
            linear_its += stats.iterations;

            let mut lambda = 1.0;
            let mut accepted = false;
            for _ in 0..=MAX_BACKTRACKS {
                for ((t, xi), di) in trial.iter_mut().zip(x.iter()).zip(&dx) {
                    *t = xi - lambda * di;
                }
                self.project(&mut trial);
                function.form_function(&trial, &mut f_trial)?;
                let trial_norm = self.merit(&trial, &f_trial);
                if self.line_search == LineSearch::Basic || trial_norm <= (1.0 - ARMIJO * lambda) * fnorm {
                    accepted = true;
                    break;
                }
                lambda *= 0.5;
            }
            if !accepted {
                return Ok(self.report(ConvergedReason::DivergedLineSearch, it, fnorm, linear_its));
            }

            let snorm = x.iter().zip(&trial).map(|(a, b)| (a - b) * (a - b)).sum::<f64>().sqrt();
            x.copy_from_slice(&trial);
            std::mem::swap(&mut f, &mut f_trial);
            fnorm = self.merit(x, &f);
            self.monitor(it, fnorm);

            if !fnorm.is_finite() {
                return Ok(self.report(ConvergedReason::DivergedFnormNan, it, fnorm, linear_its));
            }
            if fnorm <= self.atol {
                return Ok(self.report(ConvergedReason::ConvergedFnormAbs, it, fnorm, linear_its));
            }
            if fnorm <= self.rtol * fnorm0 {
                return Ok(self.report(ConvergedReason::ConvergedFnormRelative, it, fnorm, linear_its));
            }
            if snorm <= self.stol * norm2(x) {
                return Ok(self.report(ConvergedReason::ConvergedSnormRelative, it, fnorm, linear_its));
            }
        }
        Ok(self.report(ConvergedReason::DivergedMaxIts, self.max_it, fnorm, linear_its))
    }
}
