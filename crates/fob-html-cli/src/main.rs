//! `fob-html` - build HTML entry points and the scripts and stylesheets they
//! reference.

use clap::Parser;
use fob_html_cli::{cli, commands, error, logger};
use miette::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);

    let result = match args.command {
        cli::Command::Build(build_args) => commands::build::execute(build_args).await,
    };

    result.map_err(error::cli_error_to_miette)
}
