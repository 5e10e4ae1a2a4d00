//! Tracing setup driven by the options file.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::Options;
use crate::paths::FrameworkPaths;

/// Keeps the non-blocking file writer alive; dropping it flushes and stops
/// the background appender.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber from the options: an env-overridable level
/// filter, an optional console layer, and an optional rolling log file
/// under the framework's log directory.
///
/// Returns `None` when a subscriber is already installed (embedding hosts
/// may have their own).
pub fn init(options: &Options, paths: &FrameworkPaths) -> Option<TelemetryGuard> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_directive(&options.log_level))
        .with_env_var("APF_LOG")
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if options.log_to_console {
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true),
        ));
    }

    if !options.log_file.is_empty() {
        let dir = paths.log_dir();
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::RollingFileAppender::new(
                    tracing_appender::rolling::Rotation::DAILY,
                    &dir,
                    &options.log_file,
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                guards.push(guard);
                layers.push(Box::new(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_names(true),
                ));
            }
            Err(e) => {
                eprintln!("log dir init failed for {}: {e}", dir.display());
            }
        }
    }

    let subscriber = Registry::default().with(layers).with(filter);
    if subscriber.try_init().is_err() {
        return None;
    }
    Some(TelemetryGuard { _guards: guards })
}

fn level_directive(level: &str) -> tracing_subscriber::filter::Directive {
    let level = match level {
        "trace" => tracing::metadata::LevelFilter::TRACE,
        "debug" => tracing::metadata::LevelFilter::DEBUG,
        "warn" => tracing::metadata::LevelFilter::WARN,
        "error" | "fatal" => tracing::metadata::LevelFilter::ERROR,
        _ => tracing::metadata::LevelFilter::INFO,
    };
    level.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping() {
        let directive = |filter: tracing::metadata::LevelFilter| {
            let directive: tracing_subscriber::filter::Directive = filter.into();
            directive.to_string()
        };
        assert_eq!(
            level_directive("debug").to_string(),
            directive(tracing::metadata::LevelFilter::DEBUG)
        );
        assert_eq!(
            level_directive("fatal").to_string(),
            directive(tracing::metadata::LevelFilter::ERROR)
        );
        assert_eq!(
            level_directive("unknown").to_string(),
            directive(tracing::metadata::LevelFilter::INFO)
        );
    }
}
