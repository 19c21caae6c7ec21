use std::path::Path;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Console output plus `debug.log` and `error.log` under `dir`, both rotated daily.
///
/// The returned guards flush the file writers when dropped, so keep them for the
/// life of the process.
pub fn init(log_level: &str, dir: &Path) -> Result<Vec<WorkerGuard>> {
    // RUST_LOG, when set, overrides LOG_LEVEL / DEBUG
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("invalid LOG_LEVEL")?;

    let (subscriber, guards) = subscriber(filter, dir)?;
    subscriber.try_init().context("logging already initialised")?;
    Ok(guards)
}

fn subscriber(
    filter: EnvFilter,
    dir: &Path,
) -> Result<(impl Subscriber + Send + Sync + 'static, Vec<WorkerGuard>)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log dir {}", dir.display()))?;

    let (debug_writer, debug_guard) =
        tracing_appender::non_blocking(rolling::daily(dir, "debug.log"));
    let (error_writer, error_guard) =
        tracing_appender::non_blocking(rolling::daily(dir, "error.log"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(debug_writer))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::WARN),
        );

    Ok((subscriber, vec![debug_guard, error_guard]))
}
