//! Narrow logging capability injected into components.
//!
//! Components hold an `Arc<dyn Logger>` handed to them at construction and
//! never reach for a process-wide logger. [`TracingLogger`] forwards to
//! `tracing`; [`NoopLogger`] discards everything.

use std::fmt::{Display, Write as _};
use std::sync::Arc;

/// Structured key/value pairs attached to a log line.
pub type Fields<'a> = &'a [(&'a str, &'a dyn Display)];

/// Logging interface the core depends on.
pub trait Logger: Send + Sync {
    /// Detail useful only when diagnosing a problem.
    fn debug(&self, msg: &str, fields: Fields<'_>);
    /// Normal progress, such as an instance being created or terminated.
    fn info(&self, msg: &str, fields: Fields<'_>);
    /// Something an operator should look at, such as billing that did not stop.
    fn warn(&self, msg: &str, fields: Fields<'_>);
    /// A failure that may leave an instance billing.
    fn error(&self, msg: &str, fields: Fields<'_>);
}

/// Logger that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl NoopLogger {
    /// Shared no-op logger.
    #[must_use]
    pub fn shared() -> Arc<dyn Logger> {
        Arc::new(Self)
    }
}

impl Logger for NoopLogger {
    fn debug(&self, _msg: &str, _fields: Fields<'_>) {}
    fn info(&self, _msg: &str, _fields: Fields<'_>) {}
    fn warn(&self, _msg: &str, _fields: Fields<'_>) {}
    fn error(&self, _msg: &str, _fields: Fields<'_>) {}
}

/// Logger backed by `tracing` events.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    component: String,
}

impl TracingLogger {
    /// Create a logger tagging every event with `component`.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Shared tracing logger for `component`.
    pub fn shared(component: impl Into<String>) -> Arc<dyn Logger> {
        Arc::new(Self::new(component))
    }
}

impl Logger for TracingLogger {
    fn debug(&self, msg: &str, fields: Fields<'_>) {
        let fields = render_fields(fields);
        tracing::debug!(target: "gpu_deploy", component = %self.component, fields = %fields, "{msg}");
    }

    fn info(&self, msg: &str, fields: Fields<'_>) {
        let fields = render_fields(fields);
        tracing::info!(target: "gpu_deploy", component = %self.component, fields = %fields, "{msg}");
    }

    fn warn(&self, msg: &str, fields: Fields<'_>) {
        let fields = render_fields(fields);
        tracing::warn!(target: "gpu_deploy", component = %self.component, fields = %fields, "{msg}");
    }

    fn error(&self, msg: &str, fields: Fields<'_>) {
        let fields = render_fields(fields);
        tracing::error!(target: "gpu_deploy", component = %self.component, fields = %fields, "{msg}");
    }
}

/// Render fields as `key=value` pairs separated by spaces.
fn render_fields(fields: Fields<'_>) -> String {
    let mut out = String::new();
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{key}={value}");
    }
    out
}
