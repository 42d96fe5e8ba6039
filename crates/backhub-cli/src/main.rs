//! BackHub CLI entry point.
//!
//! Exit codes: 0 on success, 2 on user error (bad input, missing
//! target), 1 on internal failure.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use backhub_core::error::ErrorKind;
use commands::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = cli.execute().await {
        output::print_error(&e.message);
        let code = match e.kind {
            ErrorKind::NotFound
            | ErrorKind::Validation
            | ErrorKind::Config
            | ErrorKind::Conflict => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
