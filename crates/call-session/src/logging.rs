//! Logging setup
//!
//! The engine only emits `tracing` events. Applications that do not install
//! their own subscriber can call [`setup_logging`].

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt};

use crate::errors::{SessionError, SessionResult};

/// Logging options, usually loaded next to the session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` is unset
    pub filter: String,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "rvoip_call_session=info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Install a global `fmt` subscriber
///
/// The configured filter is checked even when `RUST_LOG` overrides it.
/// Returns `Ok(false)` when a subscriber was already installed.
pub fn setup_logging(config: &LoggingConfig) -> SessionResult<bool> {
    let configured = EnvFilter::try_new(&config.filter).map_err(|e| {
        SessionError::config(format!("Invalid log filter '{}': {}", config.filter, e))
    })?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(configured);

    let subscriber = fmt::Subscriber::builder().with_env_filter(filter);
    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init().is_ok()
    } else {
        subscriber.try_init().is_ok()
    };
    if installed {
        tracing::info!(
            "Call session logging initialised ({})",
            if config.json { "json" } else { "text" }
        );
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LoggingConfig::default().with_filter("rvoip_call_session=loud");
        assert!(matches!(
            setup_logging(&config),
            Err(SessionError::Configuration { .. })
        ));
    }

    #[test]
    fn test_second_setup_is_not_an_error() {
        let config = LoggingConfig::default().with_filter("rvoip_call_session=debug");
        assert!(setup_logging(&config).is_ok());
        assert_eq!(setup_logging(&config).unwrap(), false);
    }

    #[test]
    fn test_loaded_from_yaml() {
        let config: LoggingConfig = serde_yaml::from_str("json: true").unwrap();
        assert!(config.json);
        assert_eq!(config.filter, "rvoip_call_session=info");
    }
}
