//! varsolve: variational problems and SNES-style solver orchestration over Faer
//!
//! This crate turns residual and Jacobian forms plus boundary conditions into validated
//! problems, and solves them with a Newton-Krylov engine under scoped, prefix-keyed options.

pub mod assembly;
pub mod bcs;
pub mod config;
pub mod context;
pub mod core;
pub mod engine;
pub mod error;
pub mod form;
pub mod function;
pub mod problem;
pub mod solver;

// Re-exports for convenience
pub use assembly::{Assembler, DenseAssembler};
pub use bcs::{BoundaryCondition, DirichletBC, EquationBC};
pub use config::{OptionValue, OptionsDatabase, OptionsManager, SolverParameters};
pub use context::{AppContext, NullspaceKind, SolverContext, TransferManager, VectorSpaceBasis};
pub use engine::{ConvergedReason, NewtonEngine, NonlinearEngine, SnesType, SolveReport};
pub use error::{CallbackError, VError};
pub use form::{EquationStyle, Form, action, derivative};
pub use function::{Function, FunctionSpace};
pub use problem::{LinearVariationalProblem, NonlinearVariationalProblem};
pub use solver::{LinearVariationalSolver, NonlinearVariationalSolver, SolverBuilder};
