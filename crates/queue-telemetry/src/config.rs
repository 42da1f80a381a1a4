//! Telemetry configuration from environment variables.

use std::env;

use crate::TelemetryError;

/// Target whose level `LOG_LEVEL_EVENTS_SERVICE` controls.
pub const EVENTS_SERVICE_TARGET: &str = "queue_runtime::handlers::events";

/// Configuration for structured logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Global level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Level override for the events handler
    pub events_log_level: Option<String>,

    /// Emit one JSON object per line instead of human readable text
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            events_log_level: None,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LOG_LEVEL`: Global level (default: INFO)
    /// - `LOG_LEVEL_EVENTS_SERVICE`: Events handler level (default: global)
    /// - `LOG_JSON`: JSON lines (default: false in dev, true in containers)
    ///
    /// Levels accept the Python spellings too (`WARNING`, `CRITICAL`).
    pub fn from_env() -> Result<Self, TelemetryError> {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Ok(Self {
            log_level: normalize_level(
                &env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            )?,

            events_log_level: env::var("LOG_LEVEL_EVENTS_SERVICE")
                .ok()
                .map(|v| normalize_level(&v))
                .transpose()?,

            json_logs: env::var("LOG_JSON")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),
        })
    }

    /// `EnvFilter` directives for this configuration.
    #[must_use]
    pub fn filter_directives(&self) -> String {
        match &self.events_log_level {
            Some(level) => format!("{},{EVENTS_SERVICE_TARGET}={level}", self.log_level),
            None => self.log_level.clone(),
        }
    }
}

/// Map a level name onto the `tracing` spelling.
pub fn normalize_level(raw: &str) -> Result<String, TelemetryError> {
    let level = match raw.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" | "notset" => "off",
        _ => return Err(TelemetryError::Config(format!("unknown log level '{raw}'"))),
    };
    Ok(level.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.filter_directives(), "info");
    }

    #[test]
    fn test_events_override_directive() {
        let config = TelemetryConfig {
            log_level: "warn".to_string(),
            events_log_level: Some("debug".to_string()),
            json_logs: true,
        };
        assert_eq!(
            config.filter_directives(),
            "warn,queue_runtime::handlers::events=debug"
        );
    }

    #[test]
    fn test_python_level_names() {
        assert_eq!(normalize_level("WARNING").unwrap(), "warn");
        assert_eq!(normalize_level("CRITICAL").unwrap(), "error");
        assert_eq!(normalize_level(" Info ").unwrap(), "info");
        assert!(matches!(
            normalize_level("loud"),
            Err(TelemetryError::Config(_))
        ));
    }
}
