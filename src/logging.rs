use crate::config::MergeSettings;
use crate::errors::MergeResult;
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs a JSON subscriber writing to a daily rolling file in `log_dir`.
/// `RUST_LOG` wins over the configured filter. Returns `false` when a global
/// subscriber was already installed.
pub fn init_tracing(log_dir: &Path, settings: &MergeSettings) -> MergeResult<bool> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "merge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .is_ok();
    Ok(installed)
}
