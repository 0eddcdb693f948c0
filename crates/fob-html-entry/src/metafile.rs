//! Build metadata graph and in-memory output files.
//!
//! The shape follows the esbuild metafile format that HTML tooling already
//! understands: `inputs` keyed by source path, `outputs` keyed by output path,
//! both relative to the working directory. Maps are ordered, so every report is
//! sorted by path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Every input and output of a build and the edges between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metafile {
    #[serde(default)]
    pub inputs: BTreeMap<String, InputMeta>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputMeta>,
}

impl Metafile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every input and output of `other` into `self`, replacing records
    /// with the same path.
    pub fn merge(&mut self, other: Metafile) {
        self.inputs.extend(other.inputs);
        self.outputs.extend(other.outputs);
    }

    /// The output record whose entry point is `entry_point`.
    pub fn output_for_entry(&self, entry_point: &str) -> Option<(&String, &OutputMeta)> {
        self.outputs
            .iter()
            .find(|(_, output)| output.entry_point.as_deref() == Some(entry_point))
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputMeta {
    pub bytes: u64,
    #[serde(default)]
    pub imports: Vec<ImportRecord>,
}

/// An edge in the metadata graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub path: String,
    pub kind: ImportKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    /// The specifier as written in the importing file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
}

impl ImportRecord {
    pub fn new(path: impl Into<String>, kind: ImportKind) -> Self {
        Self {
            path: path.into(),
            kind,
            external: false,
            original: None,
        }
    }

    pub fn external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    pub fn original(mut self, original: impl Into<String>) -> Self {
        self.original = Some(original.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportKind {
    EntryPoint,
    ImportStatement,
    DynamicImport,
    ImportRule,
    UrlToken,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMeta {
    pub bytes: u64,
    #[serde(default)]
    pub inputs: BTreeMap<String, OutputInputMeta>,
    #[serde(default)]
    pub imports: Vec<ImportRecord>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_bundle: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputInputMeta {
    pub bytes_in_output: u64,
}

/// A file produced by a build, held in memory until it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Absolute output path.
    pub path: PathBuf,
    pub contents: Arc<[u8]>,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        let contents: Vec<u8> = contents.into();
        Self {
            path: path.into(),
            contents: Arc::from(contents),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Contents as UTF-8 text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }
}
