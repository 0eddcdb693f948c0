//! Public URLs of emitted subresources and output paths of documents.

use std::path::{Path, PathBuf};

use path_clean::PathClean;

use crate::config::BuildContext;
use crate::paths::{relative_path, to_slash};
use crate::{Error, Result};

/// How references in one document are written.
///
/// Computing the context involves the document's own output path, so it is
/// built once per document and reused for each reference in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicPathContext {
    /// `public_path` joined with the output path relative to `out_dir`.
    Absolute { public_path: String, out_dir: PathBuf },
    /// Output path relative to the directory the document is emitted to.
    Relative { document_output_dir: PathBuf },
}

impl PublicPathContext {
    /// `document` is absolute; `outbase` is the directory entry paths are
    /// made relative to when expanding `[dir]`.
    pub fn new(context: &BuildContext, document: &Path, outbase: &Path) -> Result<Self> {
        let out_dir = context.require_out_dir()?;

        if let Some(public_path) = context.public_path.as_deref().filter(|p| !p.is_empty()) {
            return Ok(PublicPathContext::Absolute {
                public_path: public_path.to_string(),
                out_dir: out_dir.to_path_buf(),
            });
        }

        let output = document_output_path(context, document, outbase)?;
        let document_output_dir = output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| out_dir.to_path_buf());
        Ok(PublicPathContext::Relative {
            document_output_dir,
        })
    }

    /// The URL `output` (absolute) is referenced by.
    pub fn public_path(&self, output: &Path) -> String {
        match self {
            PublicPathContext::Absolute {
                public_path,
                out_dir,
            } => {
                let relative = relative_path(out_dir, output);
                format!("{}/{}", public_path.trim_end_matches('/'), relative)
            }
            PublicPathContext::Relative {
                document_output_dir,
            } => relative_path(document_output_dir, output),
        }
    }
}

/// Where `document` (absolute) is emitted.
///
/// `[dir]` expands to the document's directory relative to `outbase`,
/// `[name]` to its file stem and `[ext]` to its extension. The extension is
/// appended unless the template places it with `[ext]`.
pub fn document_output_path(
    context: &BuildContext,
    document: &Path,
    outbase: &Path,
) -> Result<PathBuf> {
    let out_dir = context.require_out_dir()?;

    let name = document
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::InvalidConfig(format!("Invalid entry point: {}", document.display())))?;
    let ext = document
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("html");

    let dir = document
        .parent()
        .and_then(|parent| pathdiff::diff_paths(parent, outbase))
        .map(|dir| to_slash(&dir))
        .filter(|dir| !dir.is_empty())
        .unwrap_or_else(|| ".".to_string());

    let expanded = context
        .entry_names
        .replace("[dir]", &dir)
        .replace("[name]", name)
        .replace("[ext]", ext);

    let file = if context.entry_names.contains("[ext]") {
        expanded
    } else {
        format!("{}.{}", expanded, ext)
    };

    Ok(out_dir.join(file).clean())
}

/// The directory `[dir]` is measured from: the configured `outbase`, else the
/// lowest common ancestor of `documents` (absolute paths).
pub fn resolve_outbase(context: &BuildContext, documents: &[PathBuf]) -> PathBuf {
    context
        .outbase
        .clone()
        .or_else(|| lowest_common_ancestor(documents.iter().map(PathBuf::as_path)))
        .unwrap_or_else(|| context.working_dir.clone())
}

/// Deepest directory containing every path in `documents`.
pub fn lowest_common_ancestor<'a>(documents: impl IntoIterator<Item = &'a Path>) -> Option<PathBuf> {
    let mut ancestor: Option<PathBuf> = None;

    for document in documents {
        let dir = document.parent().unwrap_or(document);
        ancestor = Some(match ancestor {
            None => dir.to_path_buf(),
            Some(current) => current
                .components()
                .zip(dir.components())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }

    ancestor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BuildContext {
        BuildContext::new("/project").out_dir("/project/dist")
    }

    #[test]
    fn test_document_output_path_default_template() {
        let output = document_output_path(
            &context(),
            Path::new("/project/pages/blog/post.html"),
            Path::new("/project/pages"),
        )
        .unwrap();
        assert_eq!(output, PathBuf::from("/project/dist/blog/post.html"));
    }

    #[test]
    fn test_document_output_path_at_outbase() {
        let output = document_output_path(
            &context(),
            Path::new("/project/pages/index.html"),
            Path::new("/project/pages"),
        )
        .unwrap();
        assert_eq!(output, PathBuf::from("/project/dist/index.html"));
    }

    #[test]
    fn test_document_output_path_custom_template() {
        let context = context().entry_names("html/[name]");
        let output = document_output_path(
            &context,
            Path::new("/project/pages/blog/post.html"),
            Path::new("/project/pages"),
        )
        .unwrap();
        assert_eq!(output, PathBuf::from("/project/dist/html/post.html"));
    }

    #[test]
    fn test_document_output_path_template_with_ext() {
        let context = context().entry_names("[dir]/[name].[ext]");
        let output = document_output_path(
            &context,
            Path::new("/project/pages/blog/post.htm"),
            Path::new("/project/pages"),
        )
        .unwrap();
        assert_eq!(output, PathBuf::from("/project/dist/blog/post.htm"));
    }

    #[test]
    fn test_relative_public_path() {
        let ctx = PublicPathContext::new(
            &context(),
            Path::new("/project/pages/blog/post.html"),
            Path::new("/project/pages"),
        )
        .unwrap();
        assert_eq!(
            ctx.public_path(Path::new("/project/dist/main-ABC.js")),
            "../main-ABC.js"
        );
    }

    #[test]
    fn test_absolute_public_path() {
        let context = context().public_path("https://cdn.example.com/static/");
        let ctx = PublicPathContext::new(
            &context,
            Path::new("/project/pages/index.html"),
            Path::new("/project/pages"),
        )
        .unwrap();
        assert_eq!(
            ctx.public_path(Path::new("/project/dist/assets/main.js")),
            "https://cdn.example.com/static/assets/main.js"
        );
    }

    #[test]
    fn test_resolve_outbase_prefers_configured() {
        let documents = vec![PathBuf::from("/project/pages/a/index.html")];
        assert_eq!(
            resolve_outbase(&context(), &documents),
            PathBuf::from("/project/pages/a")
        );
        assert_eq!(
            resolve_outbase(&context().outbase("/project"), &documents),
            PathBuf::from("/project")
        );
    }

    #[test]
    fn test_lowest_common_ancestor() {
        let documents = [
            Path::new("/project/pages/index.html"),
            Path::new("/project/pages/blog/post.html"),
        ];
        assert_eq!(
            lowest_common_ancestor(documents),
            Some(PathBuf::from("/project/pages"))
        );
        assert_eq!(lowest_common_ancestor(std::iter::empty()), None);
    }
}
