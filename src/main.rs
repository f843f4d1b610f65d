mod cli;
mod runner;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Commands};
use samplebox::config::Settings;
use samplebox::observability;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("samplebox: {err}");
            return ExitCode::from(2);
        }
    };
    observability::init_tracing(&settings.logging.filter);

    let result = match cli.command {
        Commands::Run(args) => runner::run(settings, args).await,
        Commands::Defaults(args) => runner::defaults(&settings, args),
    };

    result.unwrap_or_else(|err| {
        tracing::error!(error = %err, "samplebox failed");
        ExitCode::from(2)
    })
}
