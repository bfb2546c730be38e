//! Tracing subscriber setup.
//!
//! Filtering follows `RUST_LOG` and defaults to `info`. Spans and events
//! carry structured fields (`event_id`, `validator`, `settlement`), so the
//! JSON format is the one to ship to a log pipeline.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use verinet_types::{Result, VerinetError};

const DEFAULT_DIRECTIVE: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Install the global subscriber.
///
/// # Errors
/// [`VerinetError::Configuration`] if `RUST_LOG` does not parse or a global
/// subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(directives)
            .map_err(|e| VerinetError::Configuration(format!("invalid RUST_LOG: {e}")))?,
        Err(_) => EnvFilter::new(DEFAULT_DIRECTIVE),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    installed.map_err(|e| VerinetError::Configuration(format!("tracing already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_refused() {
        // The first call may lose to another test's subscriber; the second
        // can never win.
        let _ = init_tracing(LogFormat::Json);
        let err = init_tracing(LogFormat::Pretty).unwrap_err();
        assert!(matches!(err, VerinetError::Configuration(_)));
    }
}
