//! The compiler seam.
//!
//! The sub-build executor never talks to a bundler directly. It hands a
//! [`CompileRequest`] to a [`Compiler`] and receives the emitted files plus a
//! [`Metafile`] describing them. [`RolldownCompiler`] is the production
//! implementation; tests substitute a recording fake.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::metafile::{Metafile, OutputFile};
use crate::types::Mode;

mod bundler;

pub use self::bundler::RolldownCompiler;

/// Target platform of a compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Browser,
    Node,
    Neutral,
}

/// One compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Entry paths relative to `working_dir`, sorted.
    pub entry_points: Vec<String>,
    /// Naming template for emitted entries, e.g. `[name]-[hash]`.
    pub entry_names: String,
    pub mode: Mode,
    pub splitting: bool,
    pub minify: bool,
    pub platform: Platform,
    pub working_dir: PathBuf,
    /// Absolute output directory. Output paths are reported under it.
    pub out_dir: PathBuf,
}

/// Everything one invocation produced.
///
/// Files are held in memory; the caller decides when (and whether) they are
/// written.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub metafile: Metafile,
    pub output_files: Vec<OutputFile>,
}

/// A bundler that can be invoked several times within one top-level build.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile `request.entry_points` and return the emitted files.
    ///
    /// Every output record produced for an entry point must carry that entry's
    /// path (relative to the working directory) in `entry_point`.
    async fn compile(&self, request: CompileRequest) -> Result<CompileOutput>;
}
