//! Rolldown-backed [`Compiler`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::try_join_all;
use regex::Regex;
use rolldown::{
    BundleOutput, BundlerBuilder as RolldownBundlerBuilder, BundlerOptions, InputItem,
    OutputFormat, Platform as RolldownPlatform, RawMinifyOptions,
};
use rolldown_common::{ChunkFilenamesOutputOption, Output};
use tracing::debug;

use super::{CompileOutput, CompileRequest, Compiler, Platform};
use crate::metafile::{
    ImportKind, ImportRecord, InputMeta, Metafile, OutputFile, OutputInputMeta, OutputMeta,
};
use crate::paths::{relative_path, to_slash};
use crate::types::Mode;
use crate::{Error, Result};

/// Compiles subresources with Rolldown.
///
/// Output is generated in memory only; writing is left to the sub-build
/// executor so collisions can be checked first. When splitting is off and more
/// than one entry is requested, each entry is bundled in isolation so that no
/// code is shared between the emitted files.
#[derive(Debug, Clone, Default)]
pub struct RolldownCompiler {
    _private: (),
}

impl RolldownCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    async fn bundle(&self, request: &CompileRequest, entries: &[String]) -> Result<CompileOutput> {
        let options = configure_rolldown_options(request, entries);

        let mut bundler = RolldownBundlerBuilder::default()
            .with_options(options)
            .build()
            .map_err(|e| Error::from_rolldown_batch(&e))?;

        let bundle = bundler
            .generate()
            .await
            .map_err(|e| Error::from_rolldown_batch(&e))?;

        collect_output(bundle, request).await
    }
}

#[async_trait]
impl Compiler for RolldownCompiler {
    async fn compile(&self, request: CompileRequest) -> Result<CompileOutput> {
        debug!(
            mode = %request.mode,
            entries = request.entry_points.len(),
            splitting = request.splitting,
            "invoking rolldown"
        );

        if request.splitting || request.entry_points.len() <= 1 {
            return self.bundle(&request, &request.entry_points).await;
        }

        let isolated = try_join_all(
            request
                .entry_points
                .iter()
                .map(|entry| self.bundle(&request, std::slice::from_ref(entry))),
        )
        .await?;

        let mut merged = CompileOutput::default();
        for output in isolated {
            merged.metafile.merge(output.metafile);
            merged.output_files.extend(output.output_files);
        }
        Ok(merged)
    }
}

fn configure_rolldown_options(request: &CompileRequest, entries: &[String]) -> BundlerOptions {
    let template = rolldown_template(&request.entry_names);

    BundlerOptions {
        input: Some(
            entries
                .iter()
                .map(|entry| InputItem {
                    name: None,
                    import: format!("./{}", entry),
                })
                .collect(),
        ),
        cwd: Some(request.working_dir.clone()),
        dir: Some(to_slash(&request.out_dir)),
        format: Some(match request.mode {
            Mode::Esm => OutputFormat::Esm,
            Mode::Iife => OutputFormat::Iife,
        }),
        platform: Some(match request.platform {
            Platform::Browser => RolldownPlatform::Browser,
            Platform::Node => RolldownPlatform::Node,
            Platform::Neutral => RolldownPlatform::Neutral,
        }),
        entry_filenames: Some(ChunkFilenamesOutputOption::String(format!("{}.js", template))),
        chunk_filenames: Some(ChunkFilenamesOutputOption::String(
            "[name]-[hash].js".to_string(),
        )),
        css_entry_filenames: Some(ChunkFilenamesOutputOption::String(format!(
            "{}.css",
            template
        ))),
        css_chunk_filenames: Some(ChunkFilenamesOutputOption::String(
            "[name]-[hash].css".to_string(),
        )),
        minify: request.minify.then(|| RawMinifyOptions::from(true)),
        ..Default::default()
    }
}

/// Translate an esbuild-style naming template into a Rolldown one.
///
/// Rolldown has no `[dir]` placeholder, so entries are always emitted flat
/// under the output directory.
fn rolldown_template(entry_names: &str) -> String {
    let template = entry_names.replace("[dir]/", "").replace("[dir]", "");
    if template.is_empty() {
        "[name]".to_string()
    } else {
        template
    }
}

/// Convert a Rolldown bundle into output files and a metadata graph keyed
/// relative to the working directory.
async fn collect_output(bundle: BundleOutput, request: &CompileRequest) -> Result<CompileOutput> {
    let working_dir = request.working_dir.as_path();
    let mut metafile = Metafile::new();
    let mut output_files = Vec::with_capacity(bundle.assets.len());
    // (chunk name, chunk output key) of every entry chunk
    let mut entry_chunks = Vec::new();
    // (file name, output key) of every stylesheet
    let mut stylesheets = Vec::new();

    for output in &bundle.assets {
        match output {
            Output::Chunk(chunk) => {
                let path = request.out_dir.join(chunk.filename.as_str());
                let key = relative_path(working_dir, &path);

                let mut meta = OutputMeta {
                    bytes: chunk.code.len() as u64,
                    exports: chunk.exports.iter().map(|e| e.to_string()).collect(),
                    ..Default::default()
                };

                for (id, module) in chunk.modules.keys.iter().zip(chunk.modules.values.iter()) {
                    let Some(input) = input_key(working_dir, &id.to_string()) else {
                        continue;
                    };
                    let bytes_in_output = module.code().map(|code| code.len() as u64).unwrap_or(0);
                    meta.inputs.insert(input, OutputInputMeta { bytes_in_output });
                }

                for import in chunk.imports.iter() {
                    let import_path = request.out_dir.join(import.as_str());
                    meta.imports.push(ImportRecord::new(
                        relative_path(working_dir, &import_path),
                        ImportKind::ImportStatement,
                    ));
                }
                for import in chunk.dynamic_imports.iter() {
                    let import_path = request.out_dir.join(import.as_str());
                    meta.imports.push(ImportRecord::new(
                        relative_path(working_dir, &import_path),
                        ImportKind::DynamicImport,
                    ));
                }

                if chunk.is_entry {
                    meta.entry_point = chunk
                        .facade_module_id
                        .as_ref()
                        .and_then(|id| input_key(working_dir, &id.to_string()));
                    entry_chunks.push((chunk.name.to_string(), key.clone()));
                }

                for id in chunk.module_ids.iter() {
                    let id = id.to_string();
                    if let Some(input) = input_key(working_dir, &id) {
                        let bytes = tokio::fs::metadata(&id).await.map(|m| m.len()).unwrap_or(0);
                        metafile.inputs.entry(input).or_insert(InputMeta {
                            bytes,
                            imports: Vec::new(),
                        });
                    }
                }

                output_files.push(OutputFile::new(path, chunk.code.clone().into_bytes()));
                metafile.outputs.insert(key, meta);
            }
            Output::Asset(asset) => {
                let path = request.out_dir.join(asset.filename.as_str());
                let key = relative_path(working_dir, &path);
                let contents = asset.source.as_bytes().to_vec();

                if asset.filename.ends_with(".css") {
                    stylesheets.push((asset.filename.to_string(), key.clone()));
                }

                metafile.outputs.insert(
                    key,
                    OutputMeta {
                        bytes: contents.len() as u64,
                        ..Default::default()
                    },
                );
                output_files.push(OutputFile::new(path, contents));
            }
        }
    }

    let template = rolldown_template(&request.entry_names);
    link_stylesheets(&mut metafile, &template, &entry_chunks, &stylesheets);

    Ok(CompileOutput {
        metafile,
        output_files,
    })
}

/// Attach each entry chunk's extracted stylesheet.
///
/// Rolldown names an entry's stylesheet with the entry template and the
/// chunk's name but reports no link between the two outputs, so the pair is
/// found by matching the stylesheet's file name against the template. A
/// stylesheet entry produces an empty script chunk next to the stylesheet;
/// its entry point moves to the stylesheet, which becomes the main output.
fn link_stylesheets(
    metafile: &mut Metafile,
    template: &str,
    entry_chunks: &[(String, String)],
    stylesheets: &[(String, String)],
) {
    for (chunk_name, chunk_key) in entry_chunks {
        let Some(pattern) = stylesheet_pattern(template, chunk_name) else {
            continue;
        };
        let stylesheet = stylesheets
            .iter()
            .find(|(filename, _)| pattern.is_match(filename));
        let Some((_, css_key)) = stylesheet else {
            continue;
        };

        let entry_point = metafile
            .outputs
            .get(chunk_key)
            .and_then(|chunk| chunk.entry_point.clone());

        match entry_point {
            Some(entry) if entry.ends_with(".css") => {
                if let Some(chunk) = metafile.outputs.get_mut(chunk_key) {
                    chunk.entry_point = None;
                }
                if let Some(css) = metafile.outputs.get_mut(css_key) {
                    css.inputs.insert(entry.clone(), OutputInputMeta::default());
                    css.entry_point = Some(entry);
                }
            }
            _ => {
                if let Some(chunk) = metafile.outputs.get_mut(chunk_key) {
                    chunk.css_bundle = Some(css_key.clone());
                }
            }
        }
    }
}

/// Regex matching the file name Rolldown gives the stylesheet of the entry
/// chunk `chunk_name`. `[hash]` (with or without a length) matches any hash.
fn stylesheet_pattern(template: &str, chunk_name: &str) -> Option<Regex> {
    let mut pattern = String::from("^");
    let mut rest = template;

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']').map(|close| open + close) else {
            break;
        };
        pattern.push_str(&regex::escape(&rest[..open]));
        match rest[open + 1..close].split(':').next() {
            Some("name") => pattern.push_str(&regex::escape(chunk_name)),
            Some("hash") => pattern.push_str("[A-Za-z0-9_-]+"),
            _ => pattern.push_str(&regex::escape(&rest[open..=close])),
        }
        rest = &rest[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push_str(r"\.css$");

    Regex::new(&pattern).ok()
}

/// Metadata key for a Rolldown module id, or `None` for virtual modules.
fn input_key(working_dir: &Path, id: &str) -> Option<String> {
    let path = PathBuf::from(id);
    if id.starts_with('\0') || !path.is_absolute() {
        return None;
    }
    Some(relative_path(working_dir, &path))
}
