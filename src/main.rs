mod audit;
mod breaker;
mod cli;
mod clock;
mod collab;
mod config;
mod health;
mod model;
mod orchestrator;
mod retry;
mod storage;
mod validate;

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::Config;
use model::ExitCode;

fn main() {
    let cli = cli::Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            init_logging("info");
            eprintln!("Configuration error: {e}");
            process::exit(ExitCode::Precondition.code());
        }
    };
    init_logging(&config.log_level);

    match cli::run(cli.command.unwrap_or_default(), &config) {
        Ok(exit) => process::exit(exit.code()),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(ExitCode::Precondition.code());
        }
    }
}

/// `RUST_LOG` wins; otherwise the configured level.
fn init_logging(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
