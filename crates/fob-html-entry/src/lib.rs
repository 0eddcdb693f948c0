#![cfg_attr(docsrs, feature(doc_cfg))]

//! # fob-html-entry
//!
//! HTML files as build entry points.
//!
//! Every HTML entry document is scanned for `<script src>` and
//! `<link rel="stylesheet">` references. The referenced subresources of *all*
//! documents are collected first and then compiled with exactly one compiler
//! invocation per output [`Mode`]; each document is then rewritten to point at
//! the emitted files and the combined metadata graph is reported.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fob_html_entry::{BuildContext, HtmlBuild, HtmlEntryOptions, RolldownCompiler};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let context = BuildContext::new(".").out_dir("dist").splitting(true);
//! let options = HtmlEntryOptions::default().integrity("sha256".parse()?);
//!
//! let report = HtmlBuild::new(context, options, Arc::new(RolldownCompiler::new()))?
//!     .build(["pages/index.html", "pages/about.html"])
//!     .await?;
//!
//! assert!(report.is_success());
//! # Ok(()) }
//! ```
//!
//! ## How a build proceeds
//!
//! 1. [`HtmlEntryPlugin::on_entry_found`] registers each entry document with the
//!    [`Coordinator`] so it knows how many documents to wait for.
//! 2. [`HtmlEntryPlugin::on_load`] scans and resolves one document and
//!    contributes its references. The last contribution closes the barrier and
//!    starts the sub-build.
//! 3. Every document awaits the shared sub-build result (bounded by a deadline
//!    while the barrier is still open) and rewrites its references.
//! 4. [`HtmlEntryPlugin::on_end`] merges the sub-build outputs and metadata into
//!    the top-level result and resets the per-build state.

use std::path::PathBuf;
use std::sync::Arc;

pub mod build;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod coordinator;
pub mod deferred;
pub mod document;
pub mod executor;
pub mod format;
pub mod integrity;
pub mod metafile;
pub mod paths;
pub mod plugin;
pub mod public_path;
pub mod reconcile;
pub mod resolver;
pub mod scanner;
pub mod timeout;
pub mod types;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_env};

pub use build::{BuildReport, HtmlBuild};
pub use cache::{CacheKey, SubBuildCache};
pub use compiler::{CompileOutput, CompileRequest, Compiler, RolldownCompiler};
pub use config::{BuildContext, HtmlBuildConfig, HtmlEntryOptions};
pub use coordinator::{BuildState, Coordinator, DocumentContribution, DocumentMeta};
pub use deferred::Deferred;
pub use document::DocumentOutput;
pub use executor::{EntryOutputs, ModeOutput, ResolvedAssets, SubBuildInput, SubBuildOutput};
pub use integrity::IntegrityAlgorithm;
pub use metafile::{ImportKind, ImportRecord, InputMeta, Metafile, OutputFile, OutputMeta};
pub use plugin::HtmlEntryPlugin;
pub use reconcile::Reconciled;
pub use resolver::{FsResolver, ResolveContext, ResolveOutcome, Resolver};
pub use types::{AssetReference, Message, Mode};

/// Error types for HTML entry builds.
///
/// The type is `Clone` because a single failure of the shared sub-build is
/// delivered to every document waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The underlying compiler rejected the build.
    #[error("Compiler error: {0}")]
    Compiler(String),

    /// The compiler reported no output record for a submitted entry point.
    #[error("Output not present for entry point \"{entry_point}\"")]
    MissingOutput { entry_point: String },

    /// Two sub-builds wrote different contents to the same output path.
    #[error("Two output files share the same path but have different contents: {path}")]
    OutputCollision { path: String },

    /// Not every expected document contributed before the deadline.
    #[error("{message}")]
    Timeout { message: String },

    /// An output file needed for an integrity hash is not in the output set.
    #[error("Output file with path \"{}\" is missing", .path.display())]
    MissingOutputFile { path: PathBuf },

    /// Integrity algorithm is not one of sha256, sha384, sha512.
    #[error("Unsupported integrity algorithm: {0}")]
    UnsupportedIntegrity(String),

    /// An HTML document could not be parsed or serialised.
    #[error("Failed to process HTML document {path}: {message}")]
    Scan { path: String, message: String },

    /// A document contributed after the barrier closed or was abandoned.
    #[error("Cannot accept references from {document}: the build barrier is no longer open")]
    BarrierClosed { document: String },

    /// I/O error with context message.
    #[error("{message}")]
    IoError {
        message: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// Broken internal invariant (a task panicked, a result was dropped unsettled).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for HTML entry operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

impl Error {
    /// Wrap an I/O error with a context message.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::IoError {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Create a compiler error from a Rolldown error batch.
    pub fn from_rolldown_batch(error: &dyn std::fmt::Debug) -> Self {
        Error::Compiler(format!("{:?}", error))
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Compiler(_) => "COMPILER_ERROR",
            Error::MissingOutput { .. } => "MISSING_OUTPUT",
            Error::OutputCollision { .. } => "OUTPUT_COLLISION",
            Error::Timeout { .. } => "TIMEOUT",
            Error::MissingOutputFile { .. } => "MISSING_OUTPUT_FILE",
            Error::UnsupportedIntegrity(_) => "UNSUPPORTED_INTEGRITY",
            Error::Scan { .. } => "SCAN_ERROR",
            Error::BarrierClosed { .. } => "BARRIER_CLOSED",
            Error::IoError { .. } | Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::InvalidConfig(msg) => Some(Box::new(format!(
                "Check the build options passed to the HTML entry plugin.\nError: {}",
                msg
            ))),
            Error::MissingOutput { entry_point } => Some(Box::new(format!(
                "The compiler produced no output for '{}'. A compiler plugin may be \
                 dropping or renaming entry chunks.",
                entry_point
            ))),
            Error::OutputCollision { path } => Some(Box::new(format!(
                "A module script and a classic script both emit '{}'. Use a naming \
                 template containing [hash] (subresource_names) so the outputs differ.",
                path
            ))),
            Error::Timeout { .. } => Some(Box::new(
                "An HTML entry point was registered but never finished resolving its \
                 references. Check that every entry document can be loaded."
                    .to_string(),
            )),
            Error::UnsupportedIntegrity(_) => Some(Box::new(
                "Supported integrity algorithms are sha256, sha384 and sha512.".to_string(),
            )),
            Error::Internal(_) => Some(Box::new(
                "This is a bug in fob-html-entry. Please report it.".to_string(),
            )),
            _ => None,
        }
    }
}
