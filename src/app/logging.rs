//! Usage: Process-wide `tracing` subscriber writing to stderr.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV: &str = "NPT_LOG";

fn env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "warn" };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Stdout carries command output only, so every event goes to stderr. Keep the returned guard
/// alive until exit; dropping it flushes buffered events.
pub fn init(verbose: bool) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(false);

    if tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(layer)
        .try_init()
        .is_err()
    {
        eprintln!("logging already initialized; keeping the existing subscriber");
    }
    guard
}
