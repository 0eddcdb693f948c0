//! Merge sub-build results into the top-level build's results.
//!
//! HTML documents reach the top-level build as pass-through copies, so the
//! compiler cannot know their true input size, the subresources they pull in
//! or that they are entry points. Those facts are restored here from what the
//! documents recorded while they were scanned.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::config::BuildContext;
use crate::coordinator::DocumentMeta;
use crate::executor::ResolvedAssets;
use crate::metafile::{Metafile, OutputFile};

/// Top-level results after reconciliation.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    pub output_files: Vec<OutputFile>,
    /// Present only when the build asked for a metadata graph.
    pub metafile: Option<Metafile>,
}

/// Reconcile the top-level `output_files` and `metafile` with the documents
/// and sub-build results of one build.
pub fn reconcile(
    context: &BuildContext,
    output_files: Vec<OutputFile>,
    metafile: Metafile,
    documents: &BTreeMap<String, DocumentMeta>,
    assets: Option<&ResolvedAssets>,
) -> Reconciled {
    let output_files = match assets {
        Some(assets) => augment_output_files(output_files, assets),
        None => output_files,
    };

    let metafile = context
        .metafile
        .then(|| augment_metafile(metafile, documents, assets));

    Reconciled {
        output_files,
        metafile,
    }
}

/// Append every subresource output, sorted by path, after the top-level
/// files. A path already present is not repeated.
pub fn augment_output_files(
    mut output_files: Vec<OutputFile>,
    assets: &ResolvedAssets,
) -> Vec<OutputFile> {
    let mut seen: FxHashSet<_> = output_files.iter().map(|file| file.path.clone()).collect();

    let mut asset_files: Vec<OutputFile> = assets
        .output_files()
        .into_iter()
        .filter(|file| seen.insert(file.path.clone()))
        .collect();
    asset_files.sort_by(|a, b| a.path.cmp(&b.path));

    output_files.extend(asset_files);
    output_files
}

/// Restore what the pass-through copy of each document lost and merge the
/// subresource graphs in.
pub fn augment_metafile(
    mut metafile: Metafile,
    documents: &BTreeMap<String, DocumentMeta>,
    assets: Option<&ResolvedAssets>,
) -> Metafile {
    for (path, document) in documents {
        if let Some(input) = metafile.inputs.get_mut(path) {
            input.bytes = document.input_bytes;
            input.imports.extend(document.imports.iter().cloned());
        }
    }

    for (path, output) in metafile.outputs.iter_mut() {
        if !path.ends_with(".html") {
            continue;
        }
        output.entry_point = output.inputs.keys().next().cloned();
        output.imports.retain(|import| import.external);
    }

    let Some(assets) = assets else {
        return metafile;
    };

    for sub_build in assets.metafiles() {
        let mut sub_build = sub_build.clone();
        for output in sub_build.outputs.values_mut() {
            output.entry_point = None;
        }
        debug!(
            inputs = sub_build.inputs.len(),
            outputs = sub_build.outputs.len(),
            "merging sub-build metadata"
        );
        metafile.merge(sub_build);
    }

    metafile
}
