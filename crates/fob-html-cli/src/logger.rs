//! Tracing subscriber for the CLI.
//!
//! Level precedence: `--verbose` (debug), then `--quiet` (errors only), then
//! `RUST_LOG`, then info.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str = "fob_html_entry=debug,fob_html_cli=debug";
const QUIET_FILTER: &str = "fob_html_entry=error,fob_html_cli=error";
const DEFAULT_FILTER: &str = "fob_html_entry=info,fob_html_cli=info";

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color && should_use_colors())
        .compact();

    tracing_subscriber::registry()
        .with(filter(verbose, quiet))
        .with(fmt_layer)
        .init();
}

fn filter(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Whether stderr output should be coloured, honouring `NO_COLOR` and
/// `FORCE_COLOR`.
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::Term::stderr().features().colors_supported()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_wins_over_quiet() {
        assert_eq!(filter(true, true).to_string(), EnvFilter::new(VERBOSE_FILTER).to_string());
    }

    #[test]
    fn test_quiet_filter() {
        assert_eq!(filter(false, true).to_string(), EnvFilter::new(QUIET_FILTER).to_string());
    }
}
