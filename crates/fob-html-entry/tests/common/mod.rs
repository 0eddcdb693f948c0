//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fob_html_entry::metafile::OutputInputMeta;
use fob_html_entry::paths::relative_path;
use fob_html_entry::{
    BuildContext, CompileOutput, CompileRequest, Compiler, HtmlBuild, HtmlEntryOptions, InputMeta,
    Metafile, Mode, OutputFile, OutputMeta, Result,
};
use parking_lot::Mutex;
use tempfile::TempDir;

/// How the fake names and fills its outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeBehavior {
    /// Emit `<stem>.js` for every mode instead of `<stem>.<mode>.js`.
    pub shared_names: bool,
    /// Emit the same bytes for an entry regardless of mode.
    pub identical_contents: bool,
    /// Extract a `<stem>.css` companion for every script entry.
    pub css_bundles: bool,
    /// Sleep before returning.
    pub delay: Option<Duration>,
}

/// A compiler that records every request and emits predictable outputs.
#[derive(Debug, Default)]
pub struct FakeCompiler {
    behavior: FakeBehavior,
    calls: Mutex<Vec<CompileRequest>>,
}

impl FakeCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<CompileRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, mode: Mode) -> Vec<CompileRequest> {
        self.calls()
            .into_iter()
            .filter(|call| call.mode == mode)
            .collect()
    }

    fn output_name(&self, entry: &str, mode: Mode) -> String {
        let stem = Path::new(entry)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("out");
        if self.behavior.shared_names {
            format!("{}.js", stem)
        } else {
            format!("{}.{}.js", stem, mode)
        }
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn compile(&self, request: CompileRequest) -> Result<CompileOutput> {
        self.calls.lock().push(request.clone());

        if let Some(delay) = self.behavior.delay {
            tokio::time::sleep(delay).await;
        }

        let mut metafile = Metafile::new();
        let mut output_files = Vec::new();

        for entry in &request.entry_points {
            let bytes = tokio::fs::metadata(request.working_dir.join(entry))
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            metafile.inputs.insert(
                entry.clone(),
                InputMeta {
                    bytes,
                    imports: vec![],
                },
            );

            let contents = if self.behavior.identical_contents {
                format!("/* {} */", entry)
            } else {
                format!("/* {} as {} */", entry, request.mode)
            };
            let main_path = request.out_dir.join(self.output_name(entry, request.mode));
            let main_key = relative_path(&request.working_dir, &main_path);

            let css_bundle = if self.behavior.css_bundles {
                let stem = Path::new(entry)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("out");
                let css_path = request.out_dir.join(format!("{}.css", stem));
                let css_key = relative_path(&request.working_dir, &css_path);
                metafile.outputs.insert(
                    css_key.clone(),
                    OutputMeta {
                        bytes: 12,
                        inputs: BTreeMap::from([(
                            entry.clone(),
                            OutputInputMeta { bytes_in_output: 12 },
                        )]),
                        ..Default::default()
                    },
                );
                output_files.push(OutputFile::new(css_path, "body{margin:0}"));
                Some(css_key)
            } else {
                None
            };

            metafile.outputs.insert(
                main_key,
                OutputMeta {
                    bytes: contents.len() as u64,
                    inputs: BTreeMap::from([(
                        entry.clone(),
                        OutputInputMeta {
                            bytes_in_output: contents.len() as u64,
                        },
                    )]),
                    entry_point: Some(entry.clone()),
                    css_bundle,
                    ..Default::default()
                },
            );
            output_files.push(OutputFile::new(main_path, contents));
        }

        Ok(CompileOutput {
            metafile,
            output_files,
        })
    }
}

/// A project directory populated with fixture files.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    pub fn file(self, relative: &str, contents: &str) -> Self {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
        self
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative)).unwrap()
    }

    /// In-memory build context writing to `dist/`.
    pub fn context(&self) -> BuildContext {
        BuildContext::new(self.root()).out_dir("dist").write(false)
    }

    pub fn build(&self, compiler: Arc<FakeCompiler>) -> HtmlBuild {
        self.build_with(self.context(), HtmlEntryOptions::default(), compiler)
    }

    pub fn build_with(
        &self,
        context: BuildContext,
        options: HtmlEntryOptions,
        compiler: Arc<FakeCompiler>,
    ) -> HtmlBuild {
        HtmlBuild::new(context, options, compiler).unwrap()
    }
}

/// The text of the output at `relative` (to the project root).
pub fn output_text(files: &[OutputFile], root: &Path, relative: &str) -> Option<String> {
    let path = root.join(relative);
    files
        .iter()
        .find(|file| file.path == path)
        .map(OutputFile::text)
}

pub fn html(head: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    {}\n  </head>\n  <body></body>\n</html>\n",
        head
    )
}
