//! Argument checks run before a variational problem is accepted.

use crate::bcs::BoundaryCondition;
use crate::error::VError;
use crate::form::{EquationStyle, Operand};

fn check_form(op: &Operand, what: &'static str, expected: usize) -> Result<(), VError> {
    let form = op
        .as_form()
        .ok_or(VError::TypeMismatch { what, found: op.kind() })?;
    let found = form.arity()?;
    if found != expected {
        return Err(VError::ArityMismatch { what, expected, found });
    }
    Ok(())
}

/// Check residual, Jacobian and optional preconditioner operands.
///
/// The residual must be a linear form, the Jacobian and preconditioner bilinear forms.
pub fn check_pde_args(f: &Operand, j: &Operand, jp: Option<&Operand>) -> Result<(), VError> {
    check_form(f, "residual", 1)?;
    check_form(j, "Jacobian", 2)?;
    if let Some(jp) = jp {
        check_form(jp, "preconditioner", 2)?;
    }
    Ok(())
}

/// Every non-Dirichlet boundary condition must be written in the problem's style.
pub fn check_form_style(style: EquationStyle, bcs: &[BoundaryCondition]) -> Result<(), VError> {
    if bcs.iter().filter_map(BoundaryCondition::style).all(|s| s == style) {
        Ok(())
    } else {
        Err(VError::StyleMismatch)
    }
}
