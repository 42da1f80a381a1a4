//! Log context carried by spans.
//!
//! Every log line emitted inside a [`task_span`] or [`session_span`] carries
//! the task and database session it belongs to. [`ContextLayer`] copies the
//! relevant span fields into span extensions when the span is created so the
//! JSON formatter can read them back without re-parsing formatted text.
//!
//! ```rust,ignore
//! let span = task_span("process_event", &message_id);
//! async move {
//!     tracing::info!("Processing event"); // carries taskInfo
//! }
//! .instrument(span)
//! .await;
//! ```

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{info_span, Span, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

pub const DB_SESSION_FIELD: &str = "db_session";
pub const TASK_NAME_FIELD: &str = "task_name";
pub const TASK_ID_FIELD: &str = "task_id";

/// Span for one unit of work, such as a consumed message.
pub fn task_span(name: &str, id: &str) -> Span {
    info_span!("task", task_name = %name, task_id = %id)
}

/// Span for the lifetime of one database session scope.
pub fn session_span(scope_id: &str) -> Span {
    info_span!("db_session", db_session = %scope_id)
}

/// Context fields recorded on a span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanContext {
    pub db_session: Option<String>,
    pub task_name: Option<String>,
    pub task_id: Option<String>,
}

impl SpanContext {
    fn is_empty(&self) -> bool {
        self.db_session.is_none() && self.task_name.is_none() && self.task_id.is_none()
    }

    /// Fill unset fields from `other`. Inner spans win.
    pub fn inherit(&mut self, other: &SpanContext) {
        if self.db_session.is_none() {
            self.db_session.clone_from(&other.db_session);
        }
        if self.task_name.is_none() {
            self.task_name.clone_from(&other.task_name);
        }
        if self.task_id.is_none() {
            self.task_id.clone_from(&other.task_id);
        }
    }
}

struct ContextVisitor<'a>(&'a mut SpanContext);

impl ContextVisitor<'_> {
    fn set(&mut self, field: &Field, value: String) {
        match field.name() {
            DB_SESSION_FIELD => self.0.db_session = Some(value),
            TASK_NAME_FIELD => self.0.task_name = Some(value),
            TASK_ID_FIELD => self.0.task_id = Some(value),
            _ => {}
        }
    }
}

impl Visit for ContextVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field, format!("{value:?}"));
    }
}

/// Layer that stores [`SpanContext`] in span extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextLayer;

impl<S> Layer<S> for ContextLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = SpanContext::default();
        attrs.record(&mut ContextVisitor(&mut fields));
        if !fields.is_empty() {
            span.extensions_mut().insert(fields);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanContext>() {
            values.record(&mut ContextVisitor(fields));
            return;
        }
        let mut fields = SpanContext::default();
        values.record(&mut ContextVisitor(&mut fields));
        if !fields.is_empty() {
            extensions.insert(fields);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_span_wins() {
        let mut inner = SpanContext {
            db_session: Some("inner".into()),
            ..SpanContext::default()
        };
        let outer = SpanContext {
            db_session: Some("outer".into()),
            task_name: Some("process_event".into()),
            task_id: Some("42".into()),
        };
        inner.inherit(&outer);
        assert_eq!(inner.db_session.as_deref(), Some("inner"));
        assert_eq!(inner.task_name.as_deref(), Some("process_event"));
        assert_eq!(inner.task_id.as_deref(), Some("42"));
    }
}
