//! Logging setup with journald support on Linux.
//!
//! Logs go to the systemd journal when it is reachable, otherwise to a daily
//! rolling file so the progress output on stdout stays readable.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "GYMLENS_LOG";

/// HTTP client internals are only interesting when asked for explicitly.
const DEFAULT_DIRECTIVES: &str = "info,ureq=warn,rustls=warn";

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where log records ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBackend {
    Journald,
    File(PathBuf),
}

/// Filter from `directives`, falling back to the defaults when they are
/// missing or do not parse.
pub fn build_filter(directives: Option<&str>) -> EnvFilter {
    match directives.map(EnvFilter::try_new) {
        Some(Ok(filter)) => filter,
        Some(Err(e)) => {
            eprintln!("Ignoring invalid {}: {}", LOG_ENV, e);
            EnvFilter::new(DEFAULT_DIRECTIVES)
        }
        None => EnvFilter::new(DEFAULT_DIRECTIVES),
    }
}

/// Directory for the file backend.
pub fn log_dir(preferred: Option<PathBuf>) -> PathBuf {
    preferred.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gymlens")
            .join("logs")
    })
}

/// Initialize the logging system.
///
/// Level is taken from `GYMLENS_LOG` (`debug`, `info`, `warn`, `error` or
/// full directives such as `gymlens::analysis=debug`), defaulting to `info`.
pub fn init(preferred_dir: Option<PathBuf>) -> Result<LogBackend> {
    let directives = std::env::var(LOG_ENV).ok();
    let env_filter = build_filter(directives.as_deref());

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer.with_syslog_identifier("gymlens".to_string()))
                .try_init()?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(LogBackend::Journald);
        }
    }

    let dir = log_dir(preferred_dir);
    std::fs::create_dir_all(&dir)?;

    let file_appender = tracing_appender::rolling::daily(&dir, "gymlens.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard would stop the writer thread
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::info!(log_dir = %dir.display(), "Logging initialized with file backend");
    Ok(LogBackend::File(dir))
}
