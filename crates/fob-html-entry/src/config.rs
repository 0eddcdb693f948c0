//! Build configuration.
//!
//! [`BuildContext`] carries the top-level build options the HTML plugin reads
//! (where the working and output directories are, how entries are named,
//! whether to split, minify and write). [`HtmlEntryOptions`] holds the plugin's
//! own options. [`HtmlBuildConfig`] bundles both with the entry list and is
//! loaded from multiple sources.
//!
//! Priority: CLI > Environment > File > Defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::compiler::Platform;
use crate::integrity::IntegrityAlgorithm;
use crate::paths::absolutize;
use crate::{Error, Result};

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "fob-html.toml";

/// Environment variable prefix, e.g. `FOB_HTML_BUILD__OUT_DIR=dist`.
pub const ENV_PREFIX: &str = "FOB_HTML_";

const DEFAULT_BARRIER_TIMEOUT_MS: u64 = 10_000;

/// Top-level build options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildContext {
    /// Directory every relative path is resolved against.
    pub working_dir: PathBuf,

    /// Output directory. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<PathBuf>,

    /// Common ancestor of entry documents; defaults to the lowest common
    /// ancestor of all entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbase: Option<PathBuf>,

    /// Naming template for entry documents.
    pub entry_names: String,

    /// Naming template for subresources when the plugin sets none.
    pub asset_names: String,

    /// URL prefix for rewritten references. Relative references when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_path: Option<String>,

    /// Platform of the top-level build. Subresources are always compiled for
    /// the browser.
    pub platform: Platform,

    pub splitting: bool,
    pub minify: bool,

    /// Persist output files. When false, outputs are only returned in memory.
    pub write: bool,

    /// Report the metadata graph.
    pub metafile: bool,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            out_dir: None,
            outbase: None,
            entry_names: "[dir]/[name]".to_string(),
            asset_names: "[name]-[hash]".to_string(),
            public_path: None,
            platform: Platform::default(),
            splitting: false,
            minify: false,
            write: true,
            metafile: false,
        }
    }
}

impl BuildContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..Default::default()
        }
    }

    pub fn out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(out_dir.into());
        self
    }

    pub fn outbase(mut self, outbase: impl Into<PathBuf>) -> Self {
        self.outbase = Some(outbase.into());
        self
    }

    pub fn entry_names(mut self, template: impl Into<String>) -> Self {
        self.entry_names = template.into();
        self
    }

    pub fn asset_names(mut self, template: impl Into<String>) -> Self {
        self.asset_names = template.into();
        self
    }

    pub fn public_path(mut self, public_path: impl Into<String>) -> Self {
        self.public_path = Some(public_path.into());
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn splitting(mut self, enabled: bool) -> Self {
        self.splitting = enabled;
        self
    }

    pub fn minify(mut self, enabled: bool) -> Self {
        self.minify = enabled;
        self
    }

    pub fn write(mut self, enabled: bool) -> Self {
        self.write = enabled;
        self
    }

    pub fn metafile(mut self, enabled: bool) -> Self {
        self.metafile = enabled;
        self
    }

    /// Check required options and make every directory absolute.
    ///
    /// Fails with [`Error::InvalidConfig`] when no output directory is set.
    pub fn validate(&self) -> Result<BuildContext> {
        let Some(out_dir) = &self.out_dir else {
            return Err(Error::InvalidConfig(
                "`out_dir` must be set when using HTML entry points".to_string(),
            ));
        };

        if self.entry_names.contains("[hash]") {
            return Err(Error::InvalidConfig(format!(
                "entry_names \"{}\" cannot contain [hash]: document output paths must be \
                 known before their contents are",
                self.entry_names
            )));
        }

        let cwd = std::env::current_dir()?;
        let working_dir = absolutize(&cwd, &self.working_dir);

        Ok(BuildContext {
            out_dir: Some(absolutize(&working_dir, out_dir)),
            outbase: self.outbase.as_ref().map(|o| absolutize(&working_dir, o)),
            working_dir,
            ..self.clone()
        })
    }

    /// The output directory, or an error if none is configured.
    pub fn require_out_dir(&self) -> Result<&Path> {
        self.out_dir
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("`out_dir` is not set".to_string()))
    }
}

/// Options of the HTML entry plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlEntryOptions {
    /// Naming template for subresources; falls back to the build's
    /// `asset_names`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subresource_names: Option<String>,

    /// Add `integrity` attributes computed with this algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityAlgorithm>,

    /// How long a document waits for the other documents to contribute.
    pub barrier_timeout_ms: u64,

    /// Reuse sub-build results across documents and builds.
    pub cache: bool,

    /// Regex patterns of references left untouched and never compiled.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external: Vec<String>,
}

impl Default for HtmlEntryOptions {
    fn default() -> Self {
        Self {
            subresource_names: None,
            integrity: None,
            barrier_timeout_ms: DEFAULT_BARRIER_TIMEOUT_MS,
            cache: false,
            external: Vec::new(),
        }
    }
}

impl HtmlEntryOptions {
    pub fn subresource_names(mut self, template: impl Into<String>) -> Self {
        self.subresource_names = Some(template.into());
        self
    }

    pub fn integrity(mut self, algorithm: IntegrityAlgorithm) -> Self {
        self.integrity = Some(algorithm);
        self
    }

    pub fn barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    pub fn external(mut self, pattern: impl Into<String>) -> Self {
        self.external.push(pattern.into());
        self
    }

    pub fn barrier_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }

    /// The naming template subresources are emitted with.
    pub fn names_for<'a>(&'a self, context: &'a BuildContext) -> &'a str {
        self.subresource_names
            .as_deref()
            .unwrap_or(&context.asset_names)
    }

    /// Compile the `external` patterns.
    pub fn external_patterns(&self) -> Result<Vec<Regex>> {
        self.external
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    Error::InvalidConfig(format!("Invalid external pattern '{}': {}", pattern, e))
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.barrier_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "barrier_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.external_patterns()?;
        Ok(())
    }
}

/// A complete HTML build: entry documents plus both option sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlBuildConfig {
    /// Entry documents, relative to the working directory.
    pub entries: Vec<String>,
    pub build: BuildContext,
    pub html: HtmlEntryOptions,
}

impl HtmlBuildConfig {
    /// Defaults, then the config file, then `FOB_HTML_*` variables.
    ///
    /// `config_path` overrides the default `fob-html.toml` lookup. Callers add
    /// their own layers (CLI flags) before extracting.
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(HtmlBuildConfig::default()));

        let config_file = config_path.map(Path::to_path_buf).or_else(|| {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            default_path.exists().then(|| default_path.to_path_buf())
        });

        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate a configuration.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: HtmlBuildConfig = figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.html.validate()?;
        Ok(config)
    }

    /// Load from the default sources.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(config_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_validate_requires_out_dir() {
        let error = BuildContext::new("/project").validate().unwrap_err();
        assert!(matches!(error, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_absolutizes() {
        let context = BuildContext::new("/project")
            .out_dir("dist")
            .outbase("pages")
            .validate()
            .unwrap();
        assert_eq!(context.out_dir, Some(PathBuf::from("/project/dist")));
        assert_eq!(context.outbase, Some(PathBuf::from("/project/pages")));
    }

    #[test]
    fn test_validate_rejects_hashed_entry_names() {
        let error = BuildContext::new("/project")
            .out_dir("dist")
            .entry_names("[name]-[hash]")
            .validate()
            .unwrap_err();
        assert!(error.to_string().contains("[hash]"));
    }

    #[test]
    fn test_subresource_names_fall_back_to_asset_names() {
        let context = BuildContext::default().asset_names("assets/[name]-[hash]");
        let options = HtmlEntryOptions::default();
        assert_eq!(options.names_for(&context), "assets/[name]-[hash]");

        let options = options.subresource_names("[name]");
        assert_eq!(options.names_for(&context), "[name]");
    }

    #[test]
    fn test_invalid_external_pattern() {
        let options = HtmlEntryOptions::default().external("(unclosed");
        assert!(matches!(options.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_layers_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "fob-html.toml",
                r#"
                entries = ["index.html"]

                [build]
                out_dir = "dist"
                splitting = true

                [html]
                integrity = "sha384"
                "#,
            )?;
            jail.set_env("FOB_HTML_BUILD__MINIFY", "true");
            jail.set_env("FOB_HTML_HTML__BARRIER_TIMEOUT_MS", "500");

            let config = HtmlBuildConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.entries, vec!["index.html".to_string()]);
            assert_eq!(config.build.out_dir, Some(PathBuf::from("dist")));
            assert!(config.build.splitting);
            assert!(config.build.minify);
            assert!(config.build.write);
            assert_eq!(config.html.integrity, Some(IntegrityAlgorithm::Sha384));
            assert_eq!(config.html.barrier_timeout_ms, 500);
            Ok(())
        });
    }
}
