//! Console and file log sinks.

use crate::cli::FILE_GUARD;
use pipetter_config::Logging;
use std::path::Path;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter precedence: `RUST_LOG`, then `--log-level`, then `[logging].level`, then `info`.
fn filter(cli_level: Option<&str>, cfg: &Logging) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = cli_level.or(cfg.level.as_deref()).unwrap_or("info");
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

fn file_appender(file: &str, rotation: Option<&str>) -> tracing_appender::rolling::RollingFileAppender {
    let path = Path::new(file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map_or_else(|| "pipetter.log".into(), |n| n.to_string_lossy().into_owned());
    match rotation {
        Some("daily") => tracing_appender::rolling::daily(dir, name),
        Some("hourly") => tracing_appender::rolling::hourly(dir, name),
        _ => tracing_appender::rolling::never(dir, name),
    }
}

/// Install the global subscriber. Console output goes to stderr so stdout
/// stays clean for command results.
pub fn init(json: bool, cli_level: Option<&str>, cfg: &Logging) {
    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = cfg.file.as_deref().map(|f| {
        let (writer, guard) = tracing_appender::non_blocking(file_appender(f, cfg.rotation.as_deref()));
        *FILE_GUARD.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(guard);
        fmt::layer().json().with_ansi(false).with_writer(writer)
    });

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter(cli_level, cfg))
        .with(console)
        .with(file)
        .try_init();
}

/// Flush and stop the file writer. Statics are never dropped, so this must
/// run before the process exits.
pub fn shutdown() {
    FILE_GUARD
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
}
