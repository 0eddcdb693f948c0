//! A complete build of HTML entry points.
//!
//! [`HtmlBuild`] plays the host's part around an [`HtmlEntryPlugin`]: it
//! registers every entry, processes the documents concurrently, emits each one
//! as a pass-through copy and hands the results to `on_end` for
//! reconciliation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::{info, warn};

use crate::compiler::Compiler;
use crate::config::{BuildContext, HtmlEntryOptions};
use crate::document::DocumentOutput;
use crate::metafile::{InputMeta, Metafile, OutputFile, OutputInputMeta, OutputMeta};
use crate::paths::relative_path;
use crate::plugin::HtmlEntryPlugin;
use crate::public_path::{document_output_path, resolve_outbase};
use crate::resolver::Resolver;
use crate::types::Message;
use crate::{Error, Result};

/// Outcome of [`HtmlBuild::build`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// Emitted documents followed by subresource outputs sorted by path.
    #[serde(skip)]
    pub output_files: Vec<OutputFile>,
    /// Present when the build context asked for one.
    pub metafile: Option<Metafile>,
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Builds a set of HTML entry documents.
#[derive(Debug)]
pub struct HtmlBuild {
    plugin: HtmlEntryPlugin,
}

impl HtmlBuild {
    pub fn new(
        context: BuildContext,
        options: HtmlEntryOptions,
        compiler: Arc<dyn Compiler>,
    ) -> Result<Self> {
        Ok(Self {
            plugin: HtmlEntryPlugin::new(context, options, compiler)?,
        })
    }

    pub fn with_resolver(self, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            plugin: self.plugin.with_resolver(resolver),
        }
    }

    pub fn plugin(&self) -> &HtmlEntryPlugin {
        &self.plugin
    }

    /// Build `entries` (relative to the working directory or absolute).
    ///
    /// Per-document resolution errors are collected on the report and the
    /// affected documents are not emitted. Build-wide failures (timeout,
    /// missing output, output collision, compiler error) are returned as `Err`.
    pub async fn build<I, P>(&self, entries: I) -> Result<BuildReport>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let context = self.plugin.context();

        let mut seen = FxHashSet::default();
        let documents: Vec<PathBuf> = entries
            .into_iter()
            .map(|entry| self.plugin.document_path(entry.as_ref()))
            .filter(|document| seen.insert(document.clone()))
            .collect();

        if documents.is_empty() {
            return Err(Error::InvalidConfig("no HTML entry points given".to_string()));
        }

        for document in &documents {
            self.plugin.on_entry_found(document)?;
        }

        let outbase = resolve_outbase(context, &documents);
        info!(documents = documents.len(), "building HTML entry points");

        let outcomes = futures::future::join_all(
            documents
                .iter()
                .map(|document| self.plugin.on_load(document)),
        )
        .await;

        let mut report = BuildReport::default();
        let mut emitted = Vec::new();
        let mut metafile = Metafile::new();
        let mut fatal = None;

        for (document, outcome) in documents.iter().zip(outcomes) {
            let output = match outcome {
                Ok(output) => output,
                Err(error) => {
                    fatal.get_or_insert(error);
                    continue;
                }
            };

            report.warnings.extend(output.warnings.iter().cloned());
            if output.has_errors() {
                report.errors.extend(output.errors.iter().cloned());
                warn!(document = %output.path, errors = output.errors.len(), "document not emitted");
                continue;
            }

            let output_path = document_output_path(context, document, &outbase)?;
            record_pass_through(&mut metafile, context, &output_path, &output);
            emitted.push(OutputFile::new(output_path, output.contents.into_bytes()));
        }

        let ended = self.plugin.on_end(emitted, metafile).await;
        if let Some(error) = fatal {
            return Err(error);
        }
        let reconciled = ended?;

        if context.write {
            write_documents(&reconciled.output_files, &documents, context, &outbase).await?;
        }

        report.output_files = reconciled.output_files;
        report.metafile = reconciled.metafile;

        info!(
            outputs = report.output_files.len(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "HTML build finished"
        );
        Ok(report)
    }
}

/// Record a document the way a copy loader would: the input as emitted, one
/// output made of that input alone.
fn record_pass_through(
    metafile: &mut Metafile,
    context: &BuildContext,
    output_path: &Path,
    output: &DocumentOutput,
) {
    let bytes = output.contents.len() as u64;

    metafile.inputs.insert(
        output.path.clone(),
        InputMeta {
            bytes,
            imports: Vec::new(),
        },
    );
    metafile.outputs.insert(
        relative_path(&context.working_dir, output_path),
        OutputMeta {
            bytes,
            inputs: BTreeMap::from([(
                output.path.clone(),
                OutputInputMeta {
                    bytes_in_output: bytes,
                },
            )]),
            imports: output.imports.clone(),
            ..Default::default()
        },
    );
}

/// Write the emitted documents. Subresources were written by the sub-build.
async fn write_documents(
    output_files: &[OutputFile],
    documents: &[PathBuf],
    context: &BuildContext,
    outbase: &Path,
) -> Result<()> {
    let mut document_outputs = FxHashSet::default();
    for document in documents {
        document_outputs.insert(document_output_path(context, document, outbase)?);
    }

    for file in output_files
        .iter()
        .filter(|file| document_outputs.contains(&file.path))
    {
        if let Some(dir) = file.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::io(format!("Failed to create directory {}", dir.display()), e))?;
        }
        tokio::fs::write(&file.path, &file.contents)
            .await
            .map_err(|e| Error::io(format!("Failed to write {}", file.path.display()), e))?;
    }

    Ok(())
}
