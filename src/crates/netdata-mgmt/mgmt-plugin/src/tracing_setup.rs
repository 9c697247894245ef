//! Tracing configuration.
//!
//! Logs go to the systemd journal when the agent runs with one
//! (`NETDATA_SYSTEMD_JOURNAL_PATH` is set), to stderr otherwise. Stdout is
//! reserved for the plugin protocol.

use tracing_subscriber::{EnvFilter, prelude::*};

/// Output destination for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogOutput {
    Journal,
    Stderr,
}

impl LogOutput {
    fn detect() -> Self {
        if std::env::var("NETDATA_SYSTEMD_JOURNAL_PATH").is_ok() {
            LogOutput::Journal
        } else {
            LogOutput::Stderr
        }
    }

    fn description(&self) -> &'static str {
        match self {
            LogOutput::Journal => "systemd journal",
            LogOutput::Stderr => "stderr",
        }
    }
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_ansi(false)
}

/// Initialize tracing.
///
/// Respects RUST_LOG, otherwise uses `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let mut output = LogOutput::detect();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    let journal_error = match output {
        LogOutput::Journal => match tracing_journald::layer() {
            Ok(journald_layer) => {
                registry.with(journald_layer.with_syslog_identifier("mgmt.plugin".to_string())).init();
                None
            }
            Err(e) => {
                output = LogOutput::Stderr;
                registry.with(stderr_layer()).init();
                Some(e)
            }
        },
        LogOutput::Stderr => {
            registry.with(stderr_layer()).init();
            None
        }
    };

    if let Some(e) = journal_error {
        tracing::warn!("failed to connect to journald, logging to stderr: {}", e);
    }
    tracing::info!(
        output = ?output,
        "tracing initialized, logging to {} with filter '{}'",
        output.description(),
        default_filter,
    );
}
