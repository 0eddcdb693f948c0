//! CLI errors.

use std::path::PathBuf;

use miette::Report;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The build itself failed.
    #[error(transparent)]
    Build(#[from] fob_html_entry::Error),

    /// Some documents reported errors; nothing was emitted for them.
    #[error("Build failed with {count} error(s)")]
    Failed { count: usize },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Render a CLI error through miette.
///
/// Library errors keep their diagnostic code and help text.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Build(e) => Report::new(e),
        other => miette::miette!("{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_error_keeps_code() {
        let report = cli_error_to_miette(CliError::Build(fob_html_entry::Error::OutputCollision {
            path: "dist/a.js".to_string(),
        }));
        assert_eq!(
            report.code().map(|code| code.to_string()).as_deref(),
            Some("OUTPUT_COLLISION")
        );
    }

    #[test]
    fn test_failed_message() {
        assert_eq!(
            CliError::Failed { count: 2 }.to_string(),
            "Build failed with 2 error(s)"
        );
    }
}
