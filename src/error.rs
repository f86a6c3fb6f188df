use thiserror::Error;

use crate::engine::ConvergedReason;

/// Error raised by a user callback (pre/post residual or Jacobian hooks).
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Unified error type for varsolve

#[derive(Error, Debug)]
pub enum VError {
    #[error("type mismatch: provided {what} is a '{found}', not a Form")]
    TypeMismatch { what: &'static str, found: &'static str },
    #[error("arity mismatch: provided {what} has arity {found}, expected {expected}")]
    ArityMismatch { what: &'static str, expected: usize, found: usize },
    #[error("form style mismatch: some forms are given in 'F == 0' style, but others are given in 'A == b' style")]
    StyleMismatch,
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("nonlinear solve failed to converge after {iterations} nonlinear iterations; reason: {reason}")]
    ConvergenceFailure { reason: ConvergedReason, iterations: usize },
    #[error("callback failed: {0}")]
    Callback(#[source] CallbackError),
    #[error("assembly error: {0}")]
    Assembly(String),
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("invalid value '{value}' for option '{key}'")]
    InvalidOption { key: String, value: String },
    #[error("linear solve error: {0}")]
    LinearSolve(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
