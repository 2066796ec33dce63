//! Logging initialization for flowgate-daemon.
//!
//! Configures `tracing-subscriber` from the CLI log level and format.
//! Supports JSON structured logging and human-readable pretty format.

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
/// The `RUST_LOG` environment variable takes precedence over the CLI
/// level when set.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines (for production)
/// * `"pretty"` - Human-readable output (default)
pub fn init_tracing(level: &str, format: &str) -> Result<()> {
    let directive = match level {
        "debug" | "info" | "error" => level,
        // the historical flag vocabulary says 'warning', tracing says 'warn'
        "warning" => "warn",
        other => {
            return Err(anyhow::anyhow!(
                "unknown log level '{}', expected 'debug', 'info', 'warning' or 'error'",
                other
            ));
        }
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)
                })?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize tracing subscriber: {}", e)
                })?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                format
            ));
        }
    }

    Ok(())
}
