use authz::audit::AUDIT_TARGET;
use std::path::Path;
use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::Targets,
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Keeps the non-blocking log writers flushing. Drop on shutdown.
pub struct LoggingGuards {
    _service: WorkerGuard,
    _audit: WorkerGuard,
}

/// Daily rolling appender writing `{prefix}.{date}.log` under `logs_dir`.
pub fn rolling_appender(
    logs_dir: &Path,
    prefix: &str,
) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(logs_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(logs_dir)?;
    Ok(appender)
}

/// Only events on the audit target.
pub fn audit_only() -> Targets {
    Targets::new().with_target(AUDIT_TARGET, Level::INFO)
}

/// Initialize the logging system
///
/// Console output, a daily rolling service log and a separate daily rolling
/// audit log that only receives the `audit` target. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_logging(logs_dir: &Path) -> Result<LoggingGuards, Box<dyn std::error::Error>> {
    let (service_writer, service_guard) =
        tracing_appender::non_blocking(rolling_appender(logs_dir, "audio-gateway")?);
    let (audit_writer, audit_guard) =
        tracing_appender::non_blocking(rolling_appender(logs_dir, "audit")?);

    let timer = OffsetTime::local_rfc_3339().unwrap_or_else(|_| {
        // Local offset is unavailable in some multi-threaded environments
        OffsetTime::new(
            time::UtcOffset::UTC,
            time::format_description::well_known::Rfc3339,
        )
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(service_writer)
                .with_timer(timer.clone())
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            fmt::layer()
                .json()
                .with_writer(audit_writer)
                .with_timer(timer.clone())
                .with_target(false)
                .with_filter(audit_only()),
        )
        .with(fmt::layer().with_timer(timer).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()?;

    tracing::info!("Logging system initialized");
    tracing::info!("Log files are being written to: {:?}", logs_dir);

    Ok(LoggingGuards {
        _service: service_guard,
        _audit: audit_guard,
    })
}

pub fn log_shutdown() {
    tracing::info!("=== Audio gateway shutdown complete ===");
}
