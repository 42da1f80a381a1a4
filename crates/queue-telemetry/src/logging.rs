//! Structured logging.
//!
//! In JSON mode every event becomes one line with the schema:
//!
//! ```text
//! {
//!   "level": "INFO",
//!   "timestamp": "2024-05-01T12:00:00.000000Z",
//!   "context": "queue_runtime::handlers::events",
//!   "message": "Stored multisig transaction nonce=7",
//!   "contextMessage": {
//!     "dbSession": "4f7c...",
//!     "taskInfo": { "name": "process_event", "id": "ctag-...:12" },
//!     "errorInfo": { "function": "...", "line": 42 }
//!   }
//! }
//! ```
//!
//! `contextMessage` and each of its members are omitted when empty.

use std::fmt;
use std::fmt::Write as _;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::field::Visit;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::context::{ContextLayer, SpanContext};
use crate::{TelemetryConfig, TelemetryError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonLog<'a> {
    level: &'static str,
    timestamp: String,
    context: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_message: Option<ContextMessage>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct ContextMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    db_session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_info: Option<TaskInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_info: Option<ErrorInfo>,
}

impl ContextMessage {
    fn is_empty(&self) -> bool {
        self.db_session.is_none() && self.task_info.is_none() && self.error_info.is_none()
    }
}

#[derive(Serialize)]
struct TaskInfo {
    name: String,
    id: String,
}

#[derive(Serialize)]
struct ErrorInfo {
    function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "TRACE",
        Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARNING",
        Level::ERROR => "ERROR",
    }
}

/// Collects the message and the remaining fields of one event.
#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<(&'static str, String)>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name(), format!("{value:?}")));
        }
    }
}

impl EventVisitor {
    fn into_message(self) -> String {
        let mut message = self.message;
        for (name, value) in self.fields {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(name);
            message.push('=');
            message.push_str(&value);
        }
        message
    }
}

/// JSON line formatter for `tracing_subscriber::fmt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeJsonFormat;

impl<S, N> FormatEvent<S, N> for SafeJsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut span_context = SpanContext::default();
        if let Some(scope) = ctx.event_scope() {
            for span in scope {
                if let Some(fields) = span.extensions().get::<SpanContext>() {
                    span_context.inherit(fields);
                }
            }
        }

        let mut context_message = ContextMessage {
            db_session: span_context.db_session,
            task_info: span_context.task_name.map(|name| TaskInfo {
                name,
                id: span_context.task_id.unwrap_or_default(),
            }),
            error_info: None,
        };
        if *meta.level() == Level::ERROR {
            context_message.error_info = Some(ErrorInfo {
                function: meta.module_path().unwrap_or(meta.target()).to_string(),
                line: meta.line(),
            });
        }

        let log = JsonLog {
            level: level_name(meta.level()),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            context: meta.target(),
            message: visitor.into_message(),
            context_message: (!context_message.is_empty()).then_some(context_message),
        };
        let line = serde_json::to_string(&log).map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

/// Build the subscriber described by `config`, writing to `make_writer`.
pub fn build_subscriber<W>(
    config: &TelemetryConfig,
    make_writer: W,
) -> Result<impl Subscriber + Send + Sync + 'static, TelemetryError>
where
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(config.filter_directives())
        .map_err(|e| TelemetryError::Config(e.to_string()))?;

    let json = config.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .event_format(SafeJsonFormat)
            .with_writer(make_writer.clone())
    });
    let text = (!config.json_logs).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(make_writer)
    });

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(ContextLayer)
        .with(json)
        .with(text))
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let subscriber = build_subscriber(config, std::io::stdout)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    tracing::debug!(
        filter = %config.filter_directives(),
        json_logs = config.json_logs,
        "Structured logging configured"
    );
    Ok(())
}
