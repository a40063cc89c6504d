mod app;
mod commands;
mod domain;
mod infra;
mod notion;
mod oauth;
mod shared;
pub mod test_support;

use app::cli::Cli;
use clap::Parser;
use commands::CommandContext;
use shared::error::AppResult;
use std::process::ExitCode;

pub use shared::error::AppError;

async fn execute(cli: Cli) -> AppResult<String> {
    let ctx = CommandContext::from_env()?;
    commands::dispatch(&ctx, cli.command).await?.render()
}

/// Process entry: `.env`, CLI, logging, runtime, then one command.
pub fn run() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = app::logging::init(cli.verbose);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "npt starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("ERROR: SYSTEM_ERROR: failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::debug!(code = err.code(), "command failed");
            eprintln!("ERROR: {err}");
            ExitCode::FAILURE
        }
    }
}
