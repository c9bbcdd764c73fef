// Logging module - tracing subscriber setup
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use std::io;

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(log_level: &str, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        match log_level {
            "error" | "warn" | "info" | "debug" | "trace" => log_level,
            _ => "info",
        }
    };
    format!("tempbridge={},warn", level)
}

/// Initialize logging system
///
/// `RUST_LOG` wins over the configured level. Fails if a global subscriber
/// is already installed.
pub fn init_logging(
    log_level: &str,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level, verbose)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        )
        .try_init()?;

    tracing::debug!("Logging initialized");
    Ok(())
}
