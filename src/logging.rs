//! Structured logging bootstrap.
//!
//! A small builder over `tracing-subscriber`, defaulting to human-readable
//! stdout output with `RUST_LOG`-style env-filter control, with an
//! optional rolling file appender for long-running deployments.

use tracing_subscriber::EnvFilter;

/// Output destination for log lines.
#[derive(Debug, Clone, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    File {
        directory: String,
        file_name_prefix: String,
    },
}

/// Logging configuration, loaded alongside the bridge's main config.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive applied when `RUST_LOG` is unset.
    pub default_filter: String,
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            output: LogOutput::Stdout,
        }
    }
}

/// Initializes the global tracing subscriber. Returns the file-appender
/// guard when file output is configured — the caller must hold onto it for
/// the process lifetime or buffered lines are lost on exit.
pub fn try_init(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.clone()));

    match &config.output {
        LogOutput::Stdout => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .init();
            None
        }
        LogOutput::File {
            directory,
            file_name_prefix,
        } => {
            let appender = tracing_appender::rolling::daily(directory, file_name_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
    }
}
