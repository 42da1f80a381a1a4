//! # Queue Telemetry
//!
//! Structured logging for the Safe queue service.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use queue_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env()?;
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LOG_LEVEL` | `INFO` | Global level filter |
//! | `LOG_LEVEL_EVENTS_SERVICE` | global level | Events handler level |
//! | `LOG_JSON` | `true` in containers | One JSON object per line |

mod config;
mod context;
mod logging;

pub use config::{normalize_level, TelemetryConfig, EVENTS_SERVICE_TARGET};
pub use context::{
    session_span, task_span, ContextLayer, SpanContext, DB_SESSION_FIELD, TASK_ID_FIELD,
    TASK_NAME_FIELD,
};
pub use logging::{build_subscriber, init_logging, SafeJsonFormat};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to install log subscriber: {0}")]
    SubscriberInit(String),
}
