//! courierbid - first-bid-wins delivery dispatch auction.

use clap::Parser;
use std::process::ExitCode;

use courierbid::{logging, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Keep the guard alive so the file appender flushes on exit.
    let _log_guard = match logging::init() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let args = Commands::parse();

    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
