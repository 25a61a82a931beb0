//! Logging and tracing setup.
//!
//! All logs are written to **stderr**: stdout is reserved for the handshake
//! line (plugin serve) and the reattach instructions (debug serve). The host
//! captures a plugin's stderr and folds it into its own log output.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: full `EnvFilter` directives (e.g. `terraform_provider_random=debug`)
//! - `TF_LOG`: the host's log level (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`,
//!   `JSON`, `OFF`), used when `RUST_LOG` is not set
//!
//! ```bash
//! TF_LOG=DEBUG terraform apply
//! RUST_LOG=terraform_provider_random=trace ./terraform-provider-random --debuggable
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable carrying the host's log level.
pub const TF_LOG_ENV: &str = "TF_LOG";

/// Initialize the default logging subscriber, defaulting to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level, used when neither
/// `RUST_LOG` nor `TF_LOG` is set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter_from_env(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if already initialized.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter_from_env("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

/// Build the filter from `RUST_LOG`, then `TF_LOG`, then `default_level`.
pub fn filter_from_env(default_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = std::env::var(TF_LOG_ENV)
        .ok()
        .and_then(|v| tf_log_level(&v))
        .unwrap_or(default_level);
    EnvFilter::new(level)
}

/// Map a `TF_LOG` value to a filter directive.
///
/// Unknown values yield `None` so the caller's default applies.
pub fn tf_log_level(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "JSON" => Some("trace"),
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" => Some("warn"),
        "ERROR" => Some("error"),
        "OFF" => Some("off"),
        _ => None,
    }
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}
