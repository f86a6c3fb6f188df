//! Solver configuration: option values, the options store and per-solver option scopes.

pub mod options;

pub use options::{
    InsertedOptions, OptionValue, OptionsDatabase, OptionsManager, SolverParameters, merge_defaults,
};
