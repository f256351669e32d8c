//! Tracing bootstrap for the gateway binary.
//!
//! Console output is always on. When a log directory is given, a
//! non-blocking file layer is added alongside it; the gateway is
//! long-lived, so file logs rotate daily rather than truncating on
//! startup. `RUST_LOG` overrides the default filter.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset: gateway internals at info,
/// request traces at info, everything else quiet.
const DEFAULT_FILTER: &str = "itemgate=info,tower_http=info,warn";

/// Keeps the file writer alive; dropping it flushes buffered log lines.
/// Holds nothing in console-only mode.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Installs the global subscriber.
///
/// With `log_dir` set, log files land in that directory as
/// `itemgate.log.<date>`; the directory is created if missing. Without
/// it, only the console layer is installed.
pub fn init(log_dir: Option<&Path>) -> Result<LogGuard, io::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = tracing_subscriber::fmt::layer().compact();

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(filter).with(console).init();
        return Ok(LogGuard { _file_guard: None });
    };

    fs::create_dir_all(dir)?;
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "itemgate.log"));
    let file = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global subscriber can only be installed once per process, so a
    // single test exercises init end to end.
    #[test]
    fn test_init_with_dir_creates_directory() {
        let dir = std::env::temp_dir().join(format!("itemgate_logs_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let guard = init(Some(&dir)).unwrap();
        assert!(dir.is_dir());
        drop(guard);

        fs::remove_dir_all(&dir).unwrap();
    }
}
