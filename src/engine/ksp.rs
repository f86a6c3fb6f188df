//! Inner linear solves for Newton steps (KSP-style).
//!
//! Two Krylov choices are offered: `preonly`, which applies the preconditioner once (exact for
//! `lu`), and restarted right-preconditioned GMRES (Saad §6.4). Preconditioners are built fresh from
//! the preconditioning matrix of each Newton step.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4, §13
//! - Faer documentation: https://github.com/sarah-ek/faer-rs

use std::fmt;
use std::str::FromStr;

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};

use crate::context::nullspace::VectorSpaceBasis;
use crate::context::transfer::TransferManager;
use crate::core::wrappers::{all_finite, axpy};
use crate::core::{InnerProduct, MatVec};
use crate::error::VError;

/// Krylov method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KspType {
    /// Apply the preconditioner once.
    PreOnly,
    /// Restarted GMRES with right preconditioning.
    Gmres,
}

impl FromStr for KspType {
    type Err = VError;
    fn from_str(s: &str) -> Result<Self, VError> {
        match s {
            "preonly" => Ok(KspType::PreOnly),
            "gmres" => Ok(KspType::Gmres),
            other => Err(VError::InvalidOption { key: "ksp_type".into(), value: other.into() }),
        }
    }
}

impl fmt::Display for KspType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KspType::PreOnly => "preonly",
            KspType::Gmres => "gmres",
        })
    }
}

/// Preconditioner choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcType {
    /// Dense LU with full pivoting.
    Lu,
    Jacobi,
    None,
    /// Two-level multigrid built from the attached transfer operators.
    Mg,
}

impl FromStr for PcType {
    type Err = VError;
    fn from_str(s: &str) -> Result<Self, VError> {
        match s {
            "lu" => Ok(PcType::Lu),
            "jacobi" => Ok(PcType::Jacobi),
            "none" => Ok(PcType::None),
            "mg" => Ok(PcType::Mg),
            other => Err(VError::InvalidOption { key: "pc_type".into(), value: other.into() }),
        }
    }
}

/// Linear-solver configuration.
#[derive(Debug, Clone)]
pub struct KspSettings {
    pub ksp_type: KspType,
    pub pc_type: PcType,
    pub rtol: f64,
    pub atol: f64,
    pub max_it: usize,
    /// GMRES restart length.
    pub restart: usize,
    /// Log every Krylov residual.
    pub monitor: bool,
}

impl Default for KspSettings {
    fn default() -> Self {
        Self {
            ksp_type: KspType::PreOnly,
            pc_type: PcType::Lu,
            rtol: 1e-5,
            atol: 1e-50,
            max_it: 10_000,
            restart: 30,
            monitor: false,
        }
    }
}

/// Outcome of one linear solve.
#[derive(Clone, Debug)]
pub struct LinearSolveStats {
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

/// A linear system together with everything attached to it.
pub struct LinearSystem<'a> {
    pub operator: &'a Mat<f64>,
    pub preconditioner: &'a Mat<f64>,
    pub nullspace: Option<&'a VectorSpaceBasis>,
    pub transpose_nullspace: Option<&'a VectorSpaceBasis>,
    pub transfer: Option<&'a dyn TransferManager>,
}

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), VError>;
    /// Optionally: setup/factorize from A
    fn setup(&mut self, _a: &Mat<f64>) -> Result<(), VError> {
        Ok(())
    }
}

/// No-op preconditioner.
pub struct Identity;

impl Preconditioner for Identity {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), VError> {
        z.copy_from_slice(r);
        Ok(())
    }
}

/// Jacobi preconditioner: M⁻¹ = D⁻¹
#[derive(Default)]
pub struct Jacobi {
    inv_diag: Vec<f64>,
}

fn inverse_diagonal(a: &Mat<f64>) -> Vec<f64> {
    (0..a.nrows())
        .map(|i| {
            let d = a[(i, i)];
            if d != 0.0 { 1.0 / d } else { 0.0 }
        })
        .collect()
}

impl Preconditioner for Jacobi {
    fn setup(&mut self, a: &Mat<f64>) -> Result<(), VError> {
        self.inv_diag = inverse_diagonal(a);
        Ok(())
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), VError> {
        for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = di * ri;
        }
        Ok(())
    }
}

/// Full-pivoting LU factorization from faer.
#[derive(Default)]
pub struct Lu {
    factor: Option<FullPivLu<f64>>,
}

fn lu_solve(factor: &FullPivLu<f64>, r: &[f64], z: &mut [f64]) {
    z.copy_from_slice(r);
    let n = z.len();
    factor.solve_in_place_with_conj(Conj::No, MatMut::from_column_major_slice_mut(z, n, 1));
}

impl Preconditioner for Lu {
    fn setup(&mut self, a: &Mat<f64>) -> Result<(), VError> {
        self.factor = Some(FullPivLu::new(a.as_ref()));
        Ok(())
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), VError> {
        let factor = self.factor.as_ref().ok_or(VError::InvalidState("LU applied before setup"))?;
        lu_solve(factor, r, z);
        Ok(())
    }
}

/// Two-level V-cycle: damped Jacobi smoothing around a Galerkin coarse solve `A_c = R A P`.
pub struct TwoLevel {
    a: Mat<f64>,
    inv_diag: Vec<f64>,
    prolong: Mat<f64>,
    restrict: Mat<f64>,
    coarse: Option<FullPivLu<f64>>,
    omega: f64,
}

impl TwoLevel {
    /// Materialise the transfer operators column by column.
    pub fn new(transfer: &dyn TransferManager) -> Self {
        let (n, m) = (transfer.fine_size(), transfer.coarse_size());
        let mut prolong = Mat::zeros(n, m);
        let mut unit = vec![0.0; m];
        let mut col = vec![0.0; n];
        for k in 0..m {
            unit[k] = 1.0;
            transfer.prolong(&unit, &mut col);
            unit[k] = 0.0;
            for (i, v) in col.iter().enumerate() {
                prolong[(i, k)] = *v;
            }
        }
        let mut restrict = Mat::zeros(m, n);
        let mut unit = vec![0.0; n];
        let mut col = vec![0.0; m];
        for i in 0..n {
            unit[i] = 1.0;
            transfer.restrict(&unit, &mut col);
            unit[i] = 0.0;
            for (c, v) in col.iter().enumerate() {
                restrict[(c, i)] = *v;
            }
        }
        Self { a: Mat::zeros(0, 0), inv_diag: Vec::new(), prolong, restrict, coarse: None, omega: 2.0 / 3.0 }
    }

    fn smooth(&self, r: &[f64], z: &mut [f64]) {
        let res = residual(&self.a, r, z);
        for ((zi, ri), di) in z.iter_mut().zip(&res).zip(&self.inv_diag) {
            *zi += self.omega * di * ri;
        }
    }
}

impl Preconditioner for TwoLevel {
    fn setup(&mut self, a: &Mat<f64>) -> Result<(), VError> {
        if a.nrows() != self.prolong.nrows() {
            return Err(VError::ConfigurationError(format!(
                "transfer operators act on {} dofs, operator has {}",
                self.prolong.nrows(),
                a.nrows()
            )));
        }
        let ap = a * &self.prolong;
        let ac = &self.restrict * &ap;
        self.coarse = Some(FullPivLu::new(ac.as_ref()));
        self.inv_diag = inverse_diagonal(a);
        self.a = a.clone();
        log::debug!("two-level preconditioner: {} fine, {} coarse dofs", a.nrows(), ac.nrows());
        Ok(())
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), VError> {
        let coarse = self.coarse.as_ref().ok_or(VError::InvalidState("multigrid applied before setup"))?;
        z.iter_mut().for_each(|zi| *zi = 0.0);
        self.smooth(r, z);

        let res = residual(&self.a, r, z);
        let m = self.restrict.nrows();
        let mut rc = vec![0.0; m];
        self.restrict.matvec(&res, &mut rc);
        let mut ec = vec![0.0; m];
        lu_solve(coarse, &rc, &mut ec);
        let mut fine = vec![0.0; z.len()];
        self.prolong.matvec(&ec, &mut fine);
        axpy(1.0, &fine, z);

        self.smooth(r, z);
        Ok(())
    }
}

/// `b - A x`
fn residual(a: &Mat<f64>, b: &[f64], x: &[f64]) -> Vec<f64> {
    let mut ax = vec![0.0; b.len()];
    a.matvec(x, &mut ax);
    b.iter().zip(&ax).map(|(bi, axi)| bi - axi).collect()
}

fn build_preconditioner(
    pc_type: PcType,
    p: &Mat<f64>,
    transfer: Option<&dyn TransferManager>,
) -> Result<Box<dyn Preconditioner>, VError> {
    let mut pc: Box<dyn Preconditioner> = match pc_type {
        PcType::Lu => Box::new(Lu::default()),
        PcType::Jacobi => Box::new(Jacobi::default()),
        PcType::None => Box::new(Identity),
        PcType::Mg => {
            let transfer = transfer.ok_or_else(|| {
                VError::ConfigurationError("pc_type mg requires a transfer manager".into())
            })?;
            Box::new(TwoLevel::new(transfer))
        }
    };
    pc.setup(p)?;
    Ok(pc)
}

impl KspSettings {
    /// Solve `A x = b` from a zero initial guess.
    ///
    /// The transpose null space is projected out of `b` and the operator null space out of `x`.
    pub fn solve(&self, system: &LinearSystem<'_>, b: &[f64], x: &mut [f64]) -> Result<LinearSolveStats, VError> {
        let mut rhs = b.to_vec();
        if let Some(t) = system.transpose_nullspace {
            t.remove(&mut rhs);
        }
        let pc = build_preconditioner(self.pc_type, system.preconditioner, system.transfer)?;
        x.iter_mut().for_each(|xi| *xi = 0.0);
        let mut stats = match self.ksp_type {
            KspType::PreOnly => {
                pc.apply(&rhs, x)?;
                LinearSolveStats { iterations: 1, residual_norm: 0.0, converged: true }
            }
            KspType::Gmres => self.gmres(system.operator, pc.as_ref(), &rhs, x)?,
        };
        if let Some(ns) = system.nullspace {
            ns.remove(x);
        }
        if !all_finite(x) {
            return Err(VError::LinearSolve(format!("{} produced a non-finite solution", self.ksp_type)));
        }
        stats.residual_norm = ().norm(&residual(system.operator, &rhs, x));
        Ok(stats)
    }

    fn gmres(&self, a: &Mat<f64>, pc: &dyn Preconditioner, b: &[f64], x: &mut [f64]) -> Result<LinearSolveStats, VError> {
        let n = b.len();
        let ip = ();
        let restart = self.restart.max(1);
        let epsilon = 1e-14;
        let target = (self.rtol * ip.norm(b)).max(self.atol);

        let mut r = residual(a, b, x);
        let mut beta = ip.norm(&r);
        let mut iterations = 0;
        if self.monitor {
            log::info!("{iterations:3} KSP Residual norm {beta:.12e}");
        }
        while beta > target && iterations < self.max_it {
            // Krylov basis of A M⁻¹ and the preconditioned directions z_j = M⁻¹ v_j
            let mut v: Vec<Vec<f64>> = Vec::with_capacity(restart + 1);
            let mut z: Vec<Vec<f64>> = Vec::with_capacity(restart);
            v.push(r.iter().map(|ri| ri / beta).collect());
            let mut h = vec![vec![0.0; restart]; restart + 1];
            let mut g = vec![0.0; restart + 1];
            g[0] = beta;
            let mut cs = vec![0.0; restart];
            let mut sn = vec![0.0; restart];
            let mut m = 0;
            for j in 0..restart {
                if iterations >= self.max_it {
                    break;
                }
                iterations += 1;
                let mut zj = vec![0.0; n];
                pc.apply(&v[j], &mut zj)?;
                let mut w = vec![0.0; n];
                a.matvec(&zj, &mut w);
                z.push(zj);
                // Modified Gram-Schmidt, applied twice
                for _ in 0..2 {
                    for i in 0..=j {
                        let c = ip.dot(&w, &v[i]);
                        h[i][j] += c;
                        axpy(-c, &v[i], &mut w);
                    }
                }
                h[j + 1][j] = ip.norm(&w);
                let happy_breakdown = h[j + 1][j].abs() < epsilon;
                if !happy_breakdown {
                    v.push(w.iter().map(|wi| wi / h[j + 1][j]).collect());
                }
                apply_givens(&mut h, &mut g, &mut cs, &mut sn, j, epsilon);
                m = j + 1;
                if self.monitor {
                    log::info!("{iterations:3} KSP Residual norm {:.12e}", g[j + 1].abs());
                }
                if g[j + 1].abs() <= target || happy_breakdown {
                    break;
                }
            }
            let y = back_substitution(&h, &g, m, epsilon);
            for (yk, zk) in y.iter().zip(&z) {
                axpy(*yk, zk, x);
            }
            r = residual(a, b, x);
            beta = ip.norm(&r);
            if !beta.is_finite() {
                return Err(VError::LinearSolve("GMRES residual is not finite".into()));
            }
            if m == 0 {
                break;
            }
        }
        Ok(LinearSolveStats { iterations, residual_norm: beta, converged: beta <= target })
    }
}

/// Apply the previous Givens rotations to column `j`, then eliminate `h[j+1][j]`.
fn apply_givens(h: &mut [Vec<f64>], g: &mut [f64], cs: &mut [f64], sn: &mut [f64], j: usize, epsilon: f64) {
    for i in 0..j {
        let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
        h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
        h[i][j] = temp;
    }
    let (h_kk, h_k1k) = (h[j][j], h[j + 1][j]);
    let r = h_kk.hypot(h_k1k);
    if r < epsilon {
        cs[j] = 1.0;
        sn[j] = 0.0;
    } else {
        cs[j] = h_kk / r;
        sn[j] = h_k1k / r;
    }
    h[j][j] = cs[j] * h_kk + sn[j] * h_k1k;
    h[j + 1][j] = 0.0;
    let temp = cs[j] * g[j] + sn[j] * g[j + 1];
    g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
    g[j] = temp;
}

// Upper-triangular solve; zero pivots contribute nothing.
fn back_substitution(h: &[Vec<f64>], g: &[f64], m: usize, epsilon: f64) -> Vec<f64> {
    let mut y = vec![0.0; m];
    for i in (0..m).rev() {
        let mut acc = g[i];
        for k in (i + 1)..m {
            acc -= h[i][k] * y[k];
        }
        y[i] = if h[i][i].abs() > epsilon { acc / h[i][i] } else { 0.0 };
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::transfer::LinearIntervalTransfer;
    use approx::assert_abs_diff_eq;

    fn laplacian(n: usize) -> Mat<f64> {
        Mat::from_fn(n, n, |i, j| {
            if i == j {
                2.0
            } else if i.abs_diff(j) == 1 {
                -1.0
            } else {
                0.0
            }
        })
    }

    fn system<'a>(a: &'a Mat<f64>) -> LinearSystem<'a> {
        LinearSystem { operator: a, preconditioner: a, nullspace: None, transpose_nullspace: None, transfer: None }
    }

    fn check_solution(a: &Mat<f64>, x: &[f64], b: &[f64], tol: f64) {
        for ri in residual(a, b, x) {
            assert_abs_diff_eq!(ri, 0.0, epsilon = tol);
        }
    }

    #[test]
    fn preonly_lu_is_exact() {
        let a = laplacian(6);
        let b = vec![1.0; 6];
        let mut x = vec![0.0; 6];
        let stats = KspSettings::default().solve(&system(&a), &b, &mut x).unwrap();
        assert_eq!(stats.iterations, 1);
        check_solution(&a, &x, &b, 1e-12);
    }

    #[test]
    fn gmres_with_jacobi_and_without_pc() {
        let a = laplacian(20);
        let b: Vec<f64> = (0..20).map(|i| (i as f64).sin()).collect();
        for pc_type in [PcType::Jacobi, PcType::None] {
            let settings = KspSettings { ksp_type: KspType::Gmres, pc_type, rtol: 1e-10, ..Default::default() };
            let mut x = vec![0.0; 20];
            let stats = settings.solve(&system(&a), &b, &mut x).unwrap();
            assert!(stats.converged);
            check_solution(&a, &x, &b, 1e-8);
        }
    }

    #[test]
    fn restarted_gmres_still_converges() {
        let a = laplacian(16);
        let b = vec![1.0; 16];
        let settings = KspSettings {
            ksp_type: KspType::Gmres,
            pc_type: PcType::None,
            rtol: 1e-10,
            restart: 4,
            ..Default::default()
        };
        let mut x = vec![0.0; 16];
        assert!(settings.solve(&system(&a), &b, &mut x).unwrap().converged);
        check_solution(&a, &x, &b, 1e-8);
    }

    #[test]
    fn two_level_preconditioner_accelerates_gmres() {
        let transfer = LinearIntervalTransfer::new(33);
        let a = laplacian(65);
        let b = vec![1.0; 65];
        let sys = LinearSystem { transfer: Some(&transfer), ..system(&a) };
        let mg = KspSettings { ksp_type: KspType::Gmres, pc_type: PcType::Mg, rtol: 1e-10, ..Default::default() };
        let mut x = vec![0.0; 65];
        let with_mg = mg.solve(&sys, &b, &mut x).unwrap();
        assert!(with_mg.converged);
        check_solution(&a, &x, &b, 1e-7);

        let plain = KspSettings { pc_type: PcType::None, ..mg.clone() };
        let mut y = vec![0.0; 65];
        let without = plain.solve(&sys, &b, &mut y).unwrap();
        assert!(with_mg.iterations < without.iterations);
    }

    #[test]
    fn mg_requires_transfer_operators() {
        let a = laplacian(5);
        let settings = KspSettings { pc_type: PcType::Mg, ..Default::default() };
        let mut x = vec![0.0; 5];
        assert!(matches!(
            settings.solve(&system(&a), &[1.0; 5], &mut x),
            Err(VError::ConfigurationError(_))
        ));
    }

    #[test]
    fn nullspace_is_projected_out() {
        // Neumann Laplacian: singular with the constant null space
        let mut a = laplacian(8);
        a[(0, 0)] = 1.0;
        a[(7, 7)] = 1.0;
        let ns = VectorSpaceBasis::constant();
        let sys = LinearSystem { nullspace: Some(&ns), transpose_nullspace: Some(&ns), ..system(&a) };
        let settings = KspSettings { ksp_type: KspType::Gmres, pc_type: PcType::None, rtol: 1e-10, ..Default::default() };
        let b: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let mut x = vec![0.0; 8];
        settings.solve(&sys, &b, &mut x).unwrap();
        assert_abs_diff_eq!(x.iter().sum::<f64>(), 0.0, epsilon = 1e-8);
        let mut projected = b.clone();
        ns.remove(&mut projected);
        check_solution(&a, &x, &projected, 1e-7);
    }

    #[test]
    fn parse_names() {
        assert_eq!("gmres".parse::<KspType>().unwrap(), KspType::Gmres);
        assert_eq!("mg".parse::<PcType>().unwrap(), PcType::Mg);
        assert!("ilu".parse::<PcType>().is_err());
    }
}
