//! Sub-build execution.
//!
//! One compiler invocation per non-empty [`Mode`], run concurrently. The
//! outputs are normalised into per-entry output paths, checked for cross-mode
//! collisions and only then written.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::compiler::{CompileRequest, Compiler, Platform};
use crate::config::BuildContext;
use crate::metafile::{Metafile, OutputFile};
use crate::paths::{absolutize, relative_path};
use crate::types::Mode;
use crate::{Error, Result};

/// Resolved subresource paths to compile, per mode.
///
/// Paths are relative to the working directory. Sets deduplicate repeated
/// references and keep compiler entry lists sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubBuildInput {
    esm: BTreeSet<String>,
    iife: BTreeSet<String>,
}

impl SubBuildInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path. Returns `false` if it was already present for `mode`.
    pub fn insert(&mut self, mode: Mode, path: impl Into<String>) -> bool {
        self.get_mut(mode).insert(path.into())
    }

    pub fn get(&self, mode: Mode) -> &BTreeSet<String> {
        match mode {
            Mode::Esm => &self.esm,
            Mode::Iife => &self.iife,
        }
    }

    fn get_mut(&mut self, mode: Mode) -> &mut BTreeSet<String> {
        match mode {
            Mode::Esm => &mut self.esm,
            Mode::Iife => &mut self.iife,
        }
    }

    pub fn contains(&self, mode: Mode, path: &str) -> bool {
        self.get(mode).contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.esm.is_empty() && self.iife.is_empty()
    }

    /// Total number of (mode, path) pairs.
    pub fn len(&self) -> usize {
        self.esm.len() + self.iife.len()
    }

    /// Every (mode, path) pair, ESM first.
    pub fn iter(&self) -> impl Iterator<Item = (Mode, &str)> {
        Mode::ALL
            .into_iter()
            .flat_map(move |mode| self.get(mode).iter().map(move |path| (mode, path.as_str())))
    }
}

/// Output paths produced for one subresource entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutputs {
    /// Absolute path of the main (script or stylesheet) output.
    pub main: PathBuf,
    /// Absolute path of the stylesheet extracted from a script, if any.
    pub css_bundle: Option<PathBuf>,
    /// Absolute paths of every input bundled into the outputs.
    pub inputs: Vec<PathBuf>,
}

/// Result of one mode's compiler invocation.
#[derive(Debug, Clone, Default)]
pub struct ModeOutput {
    /// Entry path (relative to the working directory) to its outputs.
    pub entries: BTreeMap<String, EntryOutputs>,
    pub output_files: Vec<OutputFile>,
    pub metafile: Metafile,
}

/// Result of a whole sub-build across modes.
#[derive(Debug, Clone, Default)]
pub struct SubBuildOutput {
    pub esm: ModeOutput,
    pub iife: ModeOutput,
    /// Every emitted file, ESM first, each path once.
    pub output_files: Vec<OutputFile>,
    /// Inputs and outputs of both modes.
    pub metafile: Metafile,
}

impl SubBuildOutput {
    pub fn mode(&self, mode: Mode) -> &ModeOutput {
        match mode {
            Mode::Esm => &self.esm,
            Mode::Iife => &self.iife,
        }
    }

    pub fn entry(&self, mode: Mode, path: &str) -> Option<&EntryOutputs> {
        self.mode(mode).entries.get(path)
    }
}

/// Compile `input` with one invocation per non-empty mode.
///
/// Files are written (when `context.write` is set) only after the collision
/// check passes, so a failed sub-build never leaves partial output behind.
pub async fn run_sub_build(
    compiler: &dyn Compiler,
    context: &BuildContext,
    entry_names: &str,
    input: &SubBuildInput,
) -> Result<SubBuildOutput> {
    let (esm, iife) = futures::try_join!(
        build_mode(compiler, context, entry_names, Mode::Esm, input.get(Mode::Esm)),
        build_mode(compiler, context, entry_names, Mode::Iife, input.get(Mode::Iife)),
    )?;

    let output_files = check_collisions(
        &context.working_dir,
        [esm.output_files.as_slice(), iife.output_files.as_slice()],
    )?;

    if context.write {
        write_output_files(&output_files).await?;
    }

    let mut metafile = esm.metafile.clone();
    metafile.merge(iife.metafile.clone());

    info!(
        esm = esm.entries.len(),
        iife = iife.entries.len(),
        outputs = output_files.len(),
        "sub-build complete"
    );

    Ok(SubBuildOutput {
        esm,
        iife,
        output_files,
        metafile,
    })
}

async fn build_mode(
    compiler: &dyn Compiler,
    context: &BuildContext,
    entry_names: &str,
    mode: Mode,
    entries: &BTreeSet<String>,
) -> Result<ModeOutput> {
    if entries.is_empty() {
        return Ok(ModeOutput::default());
    }

    let request = CompileRequest {
        entry_points: entries.iter().cloned().collect(),
        entry_names: entry_names.to_string(),
        mode,
        splitting: context.splitting && mode.supports_splitting(),
        minify: context.minify,
        platform: Platform::Browser,
        working_dir: context.working_dir.clone(),
        out_dir: context.require_out_dir()?.to_path_buf(),
    };

    debug!(%mode, entries = ?request.entry_points, splitting = request.splitting, "compiling subresources");

    let output = compiler.compile(request).await?;
    let working_dir = context.working_dir.as_path();

    let mut entry_outputs = BTreeMap::new();
    for entry in entries {
        let (main_key, meta) =
            output
                .metafile
                .output_for_entry(entry)
                .ok_or_else(|| Error::MissingOutput {
                    entry_point: entry.clone(),
                })?;

        let mut inputs: BTreeSet<&String> = meta.inputs.keys().collect();
        if let Some(css) = meta.css_bundle.as_ref().and_then(|css| output.metafile.outputs.get(css)) {
            inputs.extend(css.inputs.keys());
        }

        entry_outputs.insert(
            entry.clone(),
            EntryOutputs {
                main: absolutize(working_dir, main_key),
                css_bundle: meta.css_bundle.as_ref().map(|css| absolutize(working_dir, css)),
                inputs: inputs
                    .into_iter()
                    .map(|input| absolutize(working_dir, input))
                    .collect(),
            },
        );
    }

    Ok(ModeOutput {
        entries: entry_outputs,
        output_files: output.output_files,
        metafile: output.metafile,
    })
}

/// Concatenate per-mode outputs, failing if two modes emitted different
/// contents at the same path. Identical duplicates are kept once.
fn check_collisions<'a>(
    working_dir: &Path,
    modes: impl IntoIterator<Item = &'a [OutputFile]>,
) -> Result<Vec<OutputFile>> {
    let mut combined: Vec<OutputFile> = Vec::new();
    let mut by_path: FxHashMap<PathBuf, usize> = FxHashMap::default();

    for files in modes {
        for file in files {
            match by_path.get(&file.path) {
                Some(&index) => {
                    if combined[index].contents != file.contents {
                        return Err(Error::OutputCollision {
                            path: relative_path(working_dir, &file.path),
                        });
                    }
                }
                None => {
                    by_path.insert(file.path.clone(), combined.len());
                    combined.push(file.clone());
                }
            }
        }
    }

    Ok(combined)
}

async fn write_output_files(files: &[OutputFile]) -> Result<()> {
    let dirs: FxHashSet<&Path> = files.iter().filter_map(|file| file.path.parent()).collect();
    for dir in dirs {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::io(format!("Failed to create directory {}", dir.display()), e))?;
    }

    futures::future::try_join_all(files.iter().map(|file| async move {
        tokio::fs::write(&file.path, &file.contents)
            .await
            .map_err(|e| Error::io(format!("Failed to write {}", file.path.display()), e))
    }))
    .await?;

    Ok(())
}

/// The sub-build results one top-level build resolved its references to.
///
/// Without caching this wraps a single [`SubBuildOutput`]; with caching the
/// entries may come from several builds, some reused from earlier runs.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAssets {
    entries: BTreeMap<(Mode, String), EntryOutputs>,
    builds: Vec<Arc<SubBuildOutput>>,
}

impl ResolvedAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry of `build`.
    pub fn from_build(build: Arc<SubBuildOutput>) -> Self {
        let mut assets = Self::new();
        for mode in Mode::ALL {
            for (path, outputs) in &build.mode(mode).entries {
                assets.entries.insert((mode, path.clone()), outputs.clone());
            }
        }
        assets.builds.push(build);
        assets
    }

    /// Route `(mode, path)` to its entry in `build`.
    pub fn insert(&mut self, mode: Mode, path: &str, build: &Arc<SubBuildOutput>) -> Result<()> {
        let outputs = build
            .entry(mode, path)
            .ok_or_else(|| Error::MissingOutput {
                entry_point: path.to_string(),
            })?
            .clone();
        self.entries.insert((mode, path.to_string()), outputs);
        if !self.builds.iter().any(|known| Arc::ptr_eq(known, build)) {
            self.builds.push(Arc::clone(build));
        }
        Ok(())
    }

    pub fn entry(&self, mode: Mode, path: &str) -> Option<&EntryOutputs> {
        self.entries.get(&(mode, path.to_string()))
    }

    pub fn builds(&self) -> &[Arc<SubBuildOutput>] {
        &self.builds
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every emitted file across builds, each path once.
    pub fn output_files(&self) -> Vec<OutputFile> {
        let mut seen = FxHashSet::default();
        self.builds
            .iter()
            .flat_map(|build| build.output_files.iter())
            .filter(|file| seen.insert(file.path.clone()))
            .cloned()
            .collect()
    }

    /// Per-build metadata graphs, in build order.
    pub fn metafiles(&self) -> impl Iterator<Item = &Metafile> {
        self.builds.iter().map(|build| &build.metafile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_dedups_per_mode() {
        let mut input = SubBuildInput::new();
        assert!(input.insert(Mode::Esm, "src/a.js"));
        assert!(!input.insert(Mode::Esm, "src/a.js"));
        assert!(input.insert(Mode::Iife, "src/a.js"));
        assert_eq!(input.len(), 2);
        assert_eq!(
            input.iter().collect::<Vec<_>>(),
            vec![(Mode::Esm, "src/a.js"), (Mode::Iife, "src/a.js")]
        );
    }

    #[test]
    fn test_collision_with_different_contents() {
        let esm = vec![OutputFile::new("/project/dist/a.js", "esm")];
        let iife = vec![OutputFile::new("/project/dist/a.js", "iife")];

        let error = check_collisions(Path::new("/project"), [esm.as_slice(), iife.as_slice()])
            .unwrap_err();
        match error {
            Error::OutputCollision { path } => assert_eq!(path, "dist/a.js"),
            other => panic!("expected collision, got {:?}", other),
        }
    }

    #[test]
    fn test_identical_duplicates_kept_once() {
        let esm = vec![
            OutputFile::new("/project/dist/a.css", "body{}"),
            OutputFile::new("/project/dist/a.js", "esm"),
        ];
        let iife = vec![
            OutputFile::new("/project/dist/a.css", "body{}"),
            OutputFile::new("/project/dist/b.js", "iife"),
        ];

        let combined =
            check_collisions(Path::new("/project"), [esm.as_slice(), iife.as_slice()]).unwrap();
        let paths: Vec<_> = combined.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/project/dist/a.css"),
                PathBuf::from("/project/dist/a.js"),
                PathBuf::from("/project/dist/b.js"),
            ]
        );
    }
}
