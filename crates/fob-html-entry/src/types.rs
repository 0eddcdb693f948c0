//! Core value types shared by the scanner, coordinator and executor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Compilation flavour a subresource is built in.
///
/// An asset built in one mode cannot be reused for the other: module scripts
/// are emitted as ESM (and may share split chunks), classic scripts and
/// stylesheets are emitted as self-executing IIFE bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// `<script type="module">`
    Esm,
    /// Classic `<script>` and `<link rel="stylesheet">`
    Iife,
}

impl Mode {
    /// Every mode, in the order sub-builds are reported.
    pub const ALL: [Mode; 2] = [Mode::Esm, Mode::Iife];

    /// Whether code splitting may be enabled for this mode.
    ///
    /// Self-executing bundles cannot share chunks, so IIFE always builds with
    /// splitting off regardless of the top-level setting.
    pub fn supports_splitting(self) -> bool {
        matches!(self, Mode::Esm)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Esm => "esm",
            Mode::Iife => "iife",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "esm" | "module" => Ok(Mode::Esm),
            "iife" | "script" => Ok(Mode::Iife),
            other => Err(format!("Invalid mode: {}", other)),
        }
    }
}

/// One subresource reference discovered in a document.
///
/// `resolved_path` is relative to the build's working directory for internal
/// references, and whatever the resolver returned for external ones. External
/// references are recorded in the metadata graph but never compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    pub document: String,
    pub original_href: String,
    pub resolved_path: String,
    pub mode: Mode,
    pub external: bool,
}

/// A per-document error or warning.
///
/// These ride along with the document's result instead of aborting the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            path: None,
        }
    }

    /// Attach the document the message belongs to.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.text),
            None => f.write_str(&self.text),
        }
    }
}
