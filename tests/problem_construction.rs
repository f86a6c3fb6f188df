//! Tests for problem construction, option handling and the Jacobian cache.
//!
//! These exercise the public builders end to end: form validation errors surface before any
//! problem exists, explicit parameters override defaults, and constant Jacobians are assembled
//! once until invalidated.

use std::rc::Rc;

use faer::Mat;
use varsolve::bcs::{DirichletBC, EquationBC};
use varsolve::config::{OptionValue, OptionsDatabase, OptionsManager, merge_defaults};
use varsolve::form::{BilinearKernel, Form, LinearKernel};
use varsolve::{
    Assembler, DenseAssembler, Function, FunctionSpace, LinearVariationalProblem, LinearVariationalSolver,
    NonlinearVariationalProblem, VError, action, parameters,
};

/// Tridiagonal `[-1, 2, -1]` of size `n`.
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

#[test]
fn arity_and_type_errors_are_reported_before_construction() {
    let v = FunctionSpace::interval(4);
    let u = Function::new(&v);
    let a = Form::bilinear(BilinearKernel::constant("a", laplacian(4)));
    let l = Form::linear(LinearKernel::new("L", &v, || vec![1.0; 4]));

    // bilinear form as residual
    let err = NonlinearVariationalProblem::builder(a.clone(), &u).jacobian(a.clone()).build().unwrap_err();
    assert!(matches!(err, VError::ArityMismatch { what: "residual", expected: 1, found: 2 }));

    // linear form as Jacobian
    let err = NonlinearVariationalProblem::builder(l.clone(), &u).jacobian(l.clone()).build().unwrap_err();
    assert!(matches!(err, VError::ArityMismatch { what: "Jacobian", expected: 2, found: 1 }));

    // a plain number where a form is expected
    let err = LinearVariationalProblem::builder(2.0, &u).rhs(l.clone()).build().unwrap_err();
    assert!(matches!(err, VError::TypeMismatch { what: "Jacobian", found: "Constant" }));

    // wrong-arity right-hand side
    let err = LinearVariationalProblem::builder(a.clone(), &u).rhs(a.clone()).build().unwrap_err();
    assert!(matches!(err, VError::ArityMismatch { what: "right-hand side", .. }));
}

#[test]
fn residual_style_equation_bc_cannot_join_a_linear_problem() {
    let v = FunctionSpace::interval(4);
    let u = Function::new(&v);
    let a = Form::bilinear(BilinearKernel::constant("a", laplacian(4)));
    let uc = u.clone();
    let f = Form::linear(LinearKernel::new("F", &v, move || uc.to_vec()));
    let err = LinearVariationalProblem::builder(a, &u)
        .bc(EquationBC::residual(f, &u, 2))
        .build()
        .unwrap_err();
    assert!(matches!(err, VError::StyleMismatch));
}

#[test]
fn linear_problem_is_lowered_to_residual_form() {
    let v = FunctionSpace::interval(3);
    let u = Function::new(&v);
    u.assign(&[1.0, 2.0, 3.0]).unwrap();
    let a = Form::bilinear(BilinearKernel::constant("a", laplacian(3)));
    let l = Form::linear(LinearKernel::new("L", &v, || vec![1.0, 1.0, 1.0]));
    let p = LinearVariationalProblem::builder(a.clone(), &u).rhs(l).build().unwrap();

    let asm = DenseAssembler::new();
    let r = asm.vector(p.residual()).unwrap();
    let au = asm.vector(&action(&a, &u)).unwrap();
    for i in 0..3 {
        assert_eq!(r[i], au[i] - 1.0);
    }
    assert!(p.is_linear());
    assert!(p.jp_eq_j());
    assert!(matches!(p.jacobian(), Form::Bilinear(_)));
}

#[test]
fn explicit_parameters_win_over_defaults() {
    let explicit = parameters! { "tol" => 1e-8 };
    let defaults = parameters! { "tol" => 1e-5, "maxit" => 50 };
    let merged = merge_defaults(&explicit, &defaults);
    assert_eq!(merged.get("tol"), Some(&OptionValue::Real(1e-8)));
    assert_eq!(merged.get("maxit"), Some(&OptionValue::Int(50)));

    let db = OptionsDatabase::new();
    let manager = OptionsManager::new(&explicit, &defaults, Some("heat"), db.clone());
    assert_eq!(manager.options_prefix(), "heat_");
    {
        let _scope = manager.inserted_options();
        assert_eq!(db.get("heat_tol"), Some(OptionValue::Real(1e-8)));
        assert_eq!(db.get_int("heat_maxit").unwrap(), Some(50));
    }
    assert!(db.is_empty());
}

#[test]
fn generated_prefixes_are_unique() {
    let db = OptionsDatabase::new();
    let empty = parameters! {};
    let a = OptionsManager::new(&empty, &empty, None, db.clone());
    let b = OptionsManager::new(&empty, &empty, None, db);
    assert_ne!(a.options_prefix(), b.options_prefix());
    assert!(a.options_prefix().ends_with('_'));
}

#[test]
fn constant_jacobian_is_assembled_once_until_invalidated() {
    let n = 5;
    let v = FunctionSpace::interval(n);
    let u = Function::new(&v);
    let a = Form::bilinear(BilinearKernel::constant("a", laplacian(n)));
    let l = Form::linear(LinearKernel::new("L", &v, move || vec![1.0; n]));
    let p = LinearVariationalProblem::builder(a, &u)
        .rhs(l)
        .bcs([DirichletBC::new(&v, 0.0, 1), DirichletBC::new(&v, 0.0, 2)])
        .constant_jacobian(true)
        .build()
        .unwrap();
    let mut solver = LinearVariationalSolver::builder(&p).database(OptionsDatabase::new()).build().unwrap();

    for _ in 0..3 {
        u.assign(&vec![0.0; n]).unwrap();
        solver.solve(None).unwrap();
    }
    assert_eq!(solver.context().jacobian_assemblies(), 1);

    solver.invalidate_jacobian();
    solver.invalidate_jacobian();
    assert!(solver.context().assembled().is_empty());

    u.assign(&vec![0.0; n]).unwrap();
    solver.solve(None).unwrap();
    assert_eq!(solver.context().jacobian_assemblies(), 2);
}

#[test]
fn linear_problem_shares_its_residual_problem() {
    let v = FunctionSpace::new(2);
    let u = Function::new(&v);
    let a = Form::bilinear(BilinearKernel::constant("a", Mat::identity(2, 2)));
    let p = LinearVariationalProblem::builder(a, &u).build().unwrap();
    let shared: Rc<NonlinearVariationalProblem> = p.problem().clone();
    assert!(shared.unknown().ptr_eq(&u));
    assert!(p.rhs().is_none());
}
