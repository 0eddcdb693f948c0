//! Command-line driver for fob HTML entry builds.
//!
//! - [`cli`] - argument definitions
//! - [`commands`] - command implementations
//! - [`error`] - CLI error type and its miette rendering
//! - [`logger`] - tracing subscriber setup
//! - [`ui`] - terminal output

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;
pub mod ui;

pub use error::{CliError, Result};
