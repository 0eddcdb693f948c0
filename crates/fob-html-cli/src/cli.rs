//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Build HTML entry points with fob
#[derive(Parser, Debug)]
#[command(
    name = "fob-html",
    version,
    about = "Build HTML entry points and the subresources they reference",
    long_about = "Scans each HTML entry point for <script src> and <link rel=\"stylesheet\"> \
                  references, compiles every referenced subresource once per output mode and \
                  rewrites the documents to point at the emitted files."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build HTML entry points
    Build(BuildArgs),
}

/// Subresource integrity hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Integrity {
    Sha256,
    Sha384,
    Sha512,
}

impl From<Integrity> for fob_html_entry::IntegrityAlgorithm {
    fn from(value: Integrity) -> Self {
        match value {
            Integrity::Sha256 => Self::Sha256,
            Integrity::Sha384 => Self::Sha384,
            Integrity::Sha512 => Self::Sha512,
        }
    }
}

/// Arguments for the build command.
///
/// Every option left unset falls back to the config file, then to
/// `FOB_HTML_*` environment variables, then to the defaults.
#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// HTML entry points, relative to the working directory
    ///
    /// Examples:
    ///   fob-html build index.html
    ///   fob-html build pages/*.html --out-dir dist
    #[arg(value_name = "ENTRY")]
    pub entries: Vec<String>,

    /// Config file (defaults to fob-html.toml when present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Working directory every relative path is resolved against
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Output directory
    #[arg(short = 'd', long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Directory entry paths are made relative to when expanding [dir]
    #[arg(long, value_name = "DIR")]
    pub outbase: Option<PathBuf>,

    /// Naming template for emitted documents, e.g. "[dir]/[name]"
    #[arg(long, value_name = "TEMPLATE")]
    pub entry_names: Option<String>,

    /// Naming template for subresources, e.g. "assets/[name]-[hash]"
    #[arg(long, value_name = "TEMPLATE")]
    pub subresource_names: Option<String>,

    /// URL prefix for rewritten references (relative references when unset)
    #[arg(long, value_name = "URL")]
    pub public_path: Option<String>,

    /// Add integrity attributes computed with this algorithm
    #[arg(long, value_enum)]
    pub integrity: Option<Integrity>,

    /// Share chunks between module scripts
    #[arg(long)]
    pub splitting: bool,

    /// Minify subresources and collapse whitespace in documents
    #[arg(long)]
    pub minify: bool,

    /// Keep outputs in memory and only print the summary
    #[arg(long)]
    pub no_write: bool,

    /// Write the build's metadata graph as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub metafile: Option<PathBuf>,

    /// Reuse unchanged subresource builds across documents and builds
    #[arg(long)]
    pub cache: bool,

    /// Milliseconds a document waits for the others to resolve their references
    #[arg(long, value_name = "MS")]
    pub barrier_timeout_ms: Option<u64>,

    /// Regex of references to leave untouched (repeatable)
    #[arg(long, value_name = "PATTERN")]
    pub external: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::parse_from([
            "fob-html",
            "build",
            "index.html",
            "about.html",
            "-d",
            "public",
            "--integrity",
            "sha384",
            "--external",
            "^https://",
            "--cache",
        ]);
        let Command::Build(args) = cli.command;
        assert_eq!(args.entries, vec!["index.html", "about.html"]);
        assert_eq!(args.out_dir, Some(PathBuf::from("public")));
        assert_eq!(args.integrity, Some(Integrity::Sha384));
        assert_eq!(args.external, vec!["^https://"]);
        assert!(!args.splitting);
        assert!(args.cache);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["fob-html", "-v", "-q", "build"]).is_err());
    }
}
