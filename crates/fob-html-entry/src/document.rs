//! Processing of one HTML entry document.
//!
//! The document is read and scanned, each reference resolved and classified,
//! and the result contributed to the [`Coordinator`]. After the shared
//! sub-build settles, references are rewritten to the emitted files.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::config::HtmlEntryOptions;
use crate::coordinator::{Coordinator, DocumentContribution, DocumentMeta};
use crate::format::format_document;
use crate::integrity::integrity_for;
use crate::metafile::{ImportKind, ImportRecord};
use crate::paths::{absolutize, relative_path};
use crate::public_path::{PublicPathContext, resolve_outbase};
use crate::resolver::{ResolveContext, Resolver};
use crate::scanner::{CompanionLink, ElementEdit, ScannedDocument};
use crate::types::{AssetReference, Message, Mode};
use crate::{Error, Result};

/// Final content of one document plus what was reported about it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentOutput {
    /// Document path relative to the working directory.
    pub path: String,
    /// Rewritten (and formatted) document text.
    pub contents: String,
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
    /// Absolute paths of every input the document's subresources were built from.
    pub watch_files: Vec<PathBuf>,
    /// Size of the document before rewriting.
    pub input_bytes: u64,
    /// Every reference edge, external ones included.
    pub imports: Vec<ImportRecord>,
}

impl DocumentOutput {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A reference that resolved to a file the sub-build compiles.
struct PendingRewrite {
    index: usize,
    path: String,
    mode: Mode,
}

/// Process `document` (absolute) against `coordinator`'s build state.
///
/// The document always contributes, even when it cannot be read, so the
/// other documents are never left waiting on it.
pub async fn process_document(
    coordinator: &Coordinator,
    resolver: &dyn Resolver,
    options: &HtmlEntryOptions,
    document: &Path,
) -> Result<DocumentOutput> {
    let context = coordinator.context();
    let working_dir = context.working_dir.as_path();
    let document_rel = relative_path(working_dir, document);

    let source = match tokio::fs::read_to_string(document).await {
        Ok(source) => source,
        Err(e) => {
            if let Err(error) = coordinator.contribute(DocumentContribution::new(&document_rel)) {
                warn!(document = %document_rel, %error, "could not contribute unreadable document");
            }
            return Err(Error::io(
                format!("Failed to read {}", document.display()),
                e,
            ));
        }
    };

    let scanned = ScannedDocument::parse(source.as_str()).with_path(&document_rel);
    let resolve_dir = document
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| working_dir.to_path_buf());
    let resolve_context = ResolveContext {
        importer: document.to_path_buf(),
        resolve_dir,
        kind: ImportKind::ImportStatement,
    };

    let mut output = DocumentOutput {
        path: document_rel.clone(),
        input_bytes: source.len() as u64,
        ..Default::default()
    };
    let mut references = Vec::new();
    let mut pending = Vec::new();

    for element in scanned.elements() {
        let outcome = resolver.resolve(&element.href, &resolve_context).await;

        if outcome.external {
            debug!(document = %document_rel, href = %element.href, "skipping external reference");
            output.imports.push(
                ImportRecord::new(&element.href, ImportKind::ImportStatement)
                    .external(true)
                    .original(&element.href),
            );
            references.push(AssetReference {
                document: document_rel.clone(),
                original_href: element.href.clone(),
                resolved_path: outcome.path.to_string_lossy().into_owned(),
                mode: element.mode,
                external: true,
            });
            continue;
        }

        output.warnings.extend(
            outcome
                .warnings
                .into_iter()
                .map(|message| message.with_path(&document_rel)),
        );
        if !outcome.errors.is_empty() {
            output.errors.extend(
                outcome
                    .errors
                    .into_iter()
                    .map(|message| message.with_path(&document_rel)),
            );
            continue;
        }

        let path = relative_path(working_dir, &outcome.path);
        output.imports.push(
            ImportRecord::new(&path, ImportKind::ImportStatement).original(&element.href),
        );
        references.push(AssetReference {
            document: document_rel.clone(),
            original_href: element.href.clone(),
            resolved_path: path.clone(),
            mode: element.mode,
            external: false,
        });
        pending.push(PendingRewrite {
            index: element.index,
            path,
            mode: element.mode,
        });
    }

    coordinator.contribute(DocumentContribution {
        document: document_rel.clone(),
        references,
        meta: DocumentMeta {
            input_bytes: output.input_bytes,
            imports: output.imports.clone(),
        },
    })?;

    let assets = coordinator.await_result().await?;

    let documents: Vec<PathBuf> = coordinator
        .state()
        .expected_documents()
        .iter()
        .map(|path| absolutize(working_dir, path))
        .collect();
    let outbase = resolve_outbase(context, &documents);
    let public_path = PublicPathContext::new(context, document, &outbase)?;
    let output_files = assets.output_files();

    let mut watch_files = FxHashSet::default();
    let mut edits = Vec::with_capacity(pending.len());

    for rewrite in pending {
        let entry = assets
            .entry(rewrite.mode, &rewrite.path)
            .ok_or_else(|| Error::MissingOutput {
                entry_point: rewrite.path.clone(),
            })?;

        let companion = match &entry.css_bundle {
            Some(css) => Some(CompanionLink {
                href: public_path.public_path(css),
                integrity: integrity_for(options.integrity, css, &output_files)?,
            }),
            None => None,
        };

        edits.push(ElementEdit {
            index: rewrite.index,
            href: public_path.public_path(&entry.main),
            integrity: integrity_for(options.integrity, &entry.main, &output_files)?,
            companion,
        });

        for input in &entry.inputs {
            if watch_files.insert(input.clone()) {
                output.watch_files.push(input.clone());
            }
        }
    }

    let rewritten = scanned.serialize(&edits)?;
    output.contents = format_document(&rewritten, context.minify);

    debug!(
        document = %document_rel,
        rewritten = edits.len(),
        errors = output.errors.len(),
        "processed HTML document"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileOutput, CompileRequest, Compiler};
    use crate::config::BuildContext;
    use crate::metafile::{Metafile, OutputFile, OutputMeta};
    use crate::resolver::FsResolver;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Emits `<out_dir>/<stem>.js` containing the entry path.
    struct StemCompiler;

    #[async_trait]
    impl Compiler for StemCompiler {
        async fn compile(&self, request: CompileRequest) -> Result<CompileOutput> {
            let mut metafile = Metafile::new();
            let mut output_files = Vec::new();
            for entry in &request.entry_points {
                let stem = Path::new(entry)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("out");
                let path = request.out_dir.join(format!("{}.js", stem));
                let key = relative_path(&request.working_dir, &path);
                metafile.outputs.insert(
                    key,
                    OutputMeta {
                        entry_point: Some(entry.clone()),
                        ..Default::default()
                    },
                );
                output_files.push(OutputFile::new(path, entry.as_bytes()));
            }
            Ok(CompileOutput {
                metafile,
                output_files,
            })
        }
    }

    fn coordinator(context: BuildContext) -> Coordinator {
        let context = context.validate().unwrap();
        Coordinator::new(
            Arc::new(StemCompiler),
            Arc::new(context),
            &HtmlEntryOptions::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_rewrites_reference() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("main.js"), "console.log(1)").unwrap();
        std::fs::write(
            root.join("index.html"),
            r#"<html><head><script type="module" src="./main.js"></script></head><body></body></html>"#,
        )
        .unwrap();

        let coordinator = coordinator(BuildContext::new(root).out_dir("dist").write(false));
        coordinator.register_expected_document("index.html").unwrap();

        let output = process_document(
            &coordinator,
            &FsResolver::new(),
            &HtmlEntryOptions::default(),
            &root.join("index.html"),
        )
        .await
        .unwrap();

        assert!(output.errors.is_empty());
        assert!(output.contents.contains(r#"src="main.js""#), "{}", output.contents);
        assert_eq!(output.imports.len(), 1);
        assert_eq!(output.imports[0].path, "main.js");
    }

    #[tokio::test]
    async fn test_unresolved_reference_is_reported() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let source = r#"<html><head><script src="./missing.js"></script></head><body></body></html>"#;
        std::fs::write(root.join("index.html"), source).unwrap();

        let coordinator = coordinator(BuildContext::new(root).out_dir("dist").write(false));
        coordinator.register_expected_document("index.html").unwrap();

        let output = process_document(
            &coordinator,
            &FsResolver::new(),
            &HtmlEntryOptions::default(),
            &root.join("index.html"),
        )
        .await
        .unwrap();

        assert_eq!(output.errors.len(), 1);
        assert!(output.errors[0].text.contains("missing.js"));
        assert_eq!(output.errors[0].path.as_deref(), Some("index.html"));
        assert_eq!(output.contents, source);
    }

    #[tokio::test]
    async fn test_unreadable_document_still_contributes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let coordinator = coordinator(BuildContext::new(root).out_dir("dist").write(false));
        coordinator.register_expected_document("gone.html").unwrap();

        let error = process_document(
            &coordinator,
            &FsResolver::new(),
            &HtmlEntryOptions::default(),
            &root.join("gone.html"),
        )
        .await
        .unwrap_err();

        assert!(matches!(error, Error::IoError { .. }));
        assert!(coordinator.state().is_closed());
    }
}
