use anyhow::Result;
use clap::Parser;
use log::error;
use std::process::ExitCode;

use tileindex_batcher::cli::Cli;
use tileindex_batcher::commands::run_pipeline;
use tileindex_batcher::common::{setup_logging, RunStats};
use tileindex_batcher::config::Config;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(&cli) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<RunStats> {
    let config = Config::from_cli(cli)?;
    run_pipeline(&config)
}
