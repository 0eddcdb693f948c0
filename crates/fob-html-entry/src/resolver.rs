//! Reference resolution.
//!
//! Resolution never fails outright: problems are reported as messages on the
//! [`ResolveOutcome`] and collected with the document's result.

use std::path::PathBuf;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::Result;
use crate::config::HtmlEntryOptions;
use crate::metafile::ImportKind;
use crate::paths::absolutize;
use crate::types::Message;

/// Where a reference is being resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveContext {
    /// Absolute path of the referencing document.
    pub importer: PathBuf,
    /// Directory relative references are resolved against.
    pub resolve_dir: PathBuf,
    pub kind: ImportKind,
}

/// Result of resolving one reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOutcome {
    /// Absolute path of the resolved file, or the reference itself when
    /// external.
    pub path: PathBuf,
    pub external: bool,
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
}

impl ResolveOutcome {
    pub fn resolved(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn external(href: &str) -> Self {
        Self {
            path: PathBuf::from(href),
            external: true,
            ..Default::default()
        }
    }

    pub fn error(message: Message) -> Self {
        Self {
            errors: vec![message],
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, href: &str, context: &ResolveContext) -> ResolveOutcome;
}

/// Resolves references against the filesystem.
///
/// Query strings and fragments are ignored; references matching one of the
/// external patterns are reported as external without touching the disk.
#[derive(Debug, Clone, Default)]
pub struct FsResolver {
    external: Vec<Regex>,
}

impl FsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external(external: Vec<Regex>) -> Self {
        Self { external }
    }

    pub fn from_options(options: &HtmlEntryOptions) -> Result<Self> {
        Ok(Self::with_external(options.external_patterns()?))
    }

    fn is_external(&self, href: &str) -> bool {
        self.external.iter().any(|pattern| pattern.is_match(href))
    }
}

/// `href` without its query string and fragment.
fn strip_suffix(href: &str) -> &str {
    let end = href.find(['?', '#']).unwrap_or(href.len());
    &href[..end]
}

#[async_trait]
impl Resolver for FsResolver {
    async fn resolve(&self, href: &str, context: &ResolveContext) -> ResolveOutcome {
        if self.is_external(href) {
            debug!(href, "reference marked external");
            return ResolveOutcome::external(href);
        }

        let path = absolutize(&context.resolve_dir, strip_suffix(href));
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {
                debug!(href, path = %path.display(), "resolved reference");
                ResolveOutcome::resolved(path)
            }
            _ => ResolveOutcome::error(Message::new(format!("Could not resolve \"{}\"", href))),
        }
    }
}
