//! Process logger: human-readable stdout plus a plain-text log file.
//!
//! [`init`] builds the subscriber and installs it as the default for the calling
//! thread only. The returned [`LogGuard`] owns that installation and the file
//! writer; dropping it flushes the file and uninstalls the logger. Run the
//! pipeline on a current-thread runtime so every stage logs through it.

use std::path::Path;
use tracing::subscriber::DefaultGuard;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Keeps the logger installed and its file writer alive.
pub struct LogGuard {
    _default: DefaultGuard,
    _writer: WorkerGuard,
}

/// Map CLI verbosity flags to a filter directive.
pub fn level_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the stdout + file logger. `RUST_LOG` takes precedence over `level`.
pub fn init(log_file: &Path, level: &str) -> std::io::Result<LogGuard> {
    let dir = match log_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let file_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "training.log".into());

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_writer(std::io::stdout)
        .with_filter(filter());

    let file_appender = tracing_appender::rolling::never(&dir, file_name);
    let (non_blocking, writer_guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_writer(non_blocking)
        .with_filter(filter());

    let default_guard = tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .set_default();

    Ok(LogGuard {
        _default: default_guard,
        _writer: writer_guard,
    })
}
