//! Solver-side state the nonlinear engine calls back into.
//!
//! Modules:
//! - [`snes_context`]: the [`SolverContext`] holding cached operators, hooks, assembly flags and
//!   the application context.
//! - [`nullspace`]: null-space descriptors and their three slots.
//! - [`transfer`]: grid-transfer operators for two-level preconditioning.
//!
//! # References
//! - PETSc documentation: https://petsc.org/release/manualpages/SNES/SNESSetFunction/

pub mod nullspace;
pub mod snes_context;
pub mod transfer;

pub use nullspace::{NullspaceKind, Nullspaces, VectorSpaceBasis};
pub use snes_context::{AppContext, AssemblyState, SolverCallbacks, SolverContext};
pub use transfer::{LinearIntervalTransfer, TransferManager};
