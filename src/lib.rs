// src/lib.rs

//! Declarative command line binding.
//!
//! A command line is described by a tree of scopes. Each scope names what produces its
//! instance (a registered class, a prebuilt value or a factory method on an ancestor) and
//! a one-line definition such as `"-verbose name files* { verbose=verbose add*(files) }"`.
//! The definition's syntax clause declares the options and positionals the scope accepts;
//! its mapping clause sends some of them to fields and methods, the rest become constructor
//! arguments. Definitions are compiled once into plans that bind a command line in a
//! single pass.

pub mod cli;
pub mod constants;
pub mod core;
pub mod errors;
pub mod models;

pub use crate::cli::{Cli, command::Command};
pub use crate::core::{
    class::{Class, Param, Slots},
    context::Handle,
    defaults::Defaults,
    registry::Repository,
};
pub use crate::errors::{ArgumentError, DefinitionError, Error, Result};
