//! `fob-html build`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use figment::Figment;
use figment::providers::Serialized;
use fob_html_entry::{BuildReport, HtmlBuild, HtmlBuildConfig, IntegrityAlgorithm, RolldownCompiler};
use serde::Serialize;

use crate::cli::BuildArgs;
use crate::error::{CliError, Result};
use crate::ui;

/// Options given on the command line. Unset fields are not serialised, so
/// they leave lower-priority sources untouched when merged.
#[derive(Debug, Default, Serialize)]
struct CliOverrides {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entries: Vec<String>,
    build: BuildOverrides,
    html: HtmlOverrides,
}

#[derive(Debug, Default, Serialize)]
struct BuildOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    out_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outbase: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry_names: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    splitting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    write: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metafile: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
struct HtmlOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    subresource_names: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    integrity: Option<IntegrityAlgorithm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    barrier_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external: Option<Vec<String>>,
}

impl CliOverrides {
    fn from_args(args: &BuildArgs) -> Self {
        Self {
            entries: args.entries.clone(),
            build: BuildOverrides {
                working_dir: args.cwd.clone(),
                out_dir: args.out_dir.clone(),
                outbase: args.outbase.clone(),
                entry_names: args.entry_names.clone(),
                public_path: args.public_path.clone(),
                splitting: args.splitting.then_some(true),
                minify: args.minify.then_some(true),
                write: args.no_write.then_some(false),
                metafile: args.metafile.is_some().then_some(true),
            },
            html: HtmlOverrides {
                subresource_names: args.subresource_names.clone(),
                integrity: args.integrity.map(Into::into),
                barrier_timeout_ms: args.barrier_timeout_ms,
                cache: args.cache.then_some(true),
                external: (!args.external.is_empty()).then(|| args.external.clone()),
            },
        }
    }
}

/// Defaults < config file < environment < command line.
pub fn figment(args: &BuildArgs) -> Figment {
    HtmlBuildConfig::figment(args.config.as_deref())
        .merge(Serialized::defaults(CliOverrides::from_args(args)))
}

pub fn load_config(args: &BuildArgs) -> Result<HtmlBuildConfig> {
    let config = HtmlBuildConfig::from_figment(figment(args))
        .map_err(|e| CliError::Config(e.to_string()))?;

    if config.entries.is_empty() {
        return Err(CliError::Config(
            "no HTML entry points given (pass them as arguments or set `entries`)".to_string(),
        ));
    }
    Ok(config)
}

pub async fn execute(args: BuildArgs) -> Result<()> {
    let start = Instant::now();
    let config = load_config(&args)?;

    ui::info(&format!("Building {} HTML entry point(s)...", config.entries.len()));

    let working_dir = config.build.working_dir.clone();
    let build = HtmlBuild::new(config.build, config.html, Arc::new(RolldownCompiler::new()))?;
    let report = build.build(&config.entries).await?;

    print_summary(&report, build.plugin().context().working_dir.as_path());

    if let (Some(path), Some(metafile)) = (&args.metafile, &report.metafile) {
        let path = working_dir.join(path);
        let json = serde_json::to_string_pretty(metafile)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| CliError::Write {
                path: path.clone(),
                source,
            })?;
        ui::info(&format!("Metafile written to {}", path.display()));
    }

    if !report.is_success() {
        return Err(CliError::Failed {
            count: report.errors.len(),
        });
    }

    ui::success(&format!(
        "Build completed in {}",
        ui::format_duration(start.elapsed())
    ));
    Ok(())
}

fn print_summary(report: &BuildReport, working_dir: &std::path::Path) {
    for file in &report.output_files {
        let path = file
            .path
            .strip_prefix(working_dir)
            .unwrap_or(&file.path);
        eprintln!(
            "  {}  {}",
            path.display(),
            ui::format_size(file.contents.len() as u64)
        );
    }
    for warning in &report.warnings {
        ui::warning(&warning.to_string());
    }
    for error in &report.errors {
        ui::error(&error.to_string());
    }
}
