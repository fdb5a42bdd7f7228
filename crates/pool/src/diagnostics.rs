// Validation diagnostics
//
// The pool reports every task lifecycle transition (start, complete, error) to a
// ValidationDiagnostics sink. The sink is a collaborator; the pool depends only on
// the trait. Calls happen outside the pool's state lock, on whichever task settled
// the transition, so implementations should return quickly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{TaskId, TaskKind};

/// Lifecycle transition being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationEvent {
    Start,
    Complete,
    Error,
}

/// Shape summary of a schema, cheap to copy into every event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSummary {
    /// Top-level `type`, rendered as written (`"object"`, `["string","null"]`)
    pub schema_type: Option<String>,
    /// Number of top-level `properties`
    pub property_count: usize,
    /// Number of top-level `required` entries
    pub required_count: usize,
}

impl SchemaSummary {
    pub fn of(schema: &Value) -> Self {
        let schema_type = schema.get("type").map(|t| match t {
            Value::String(name) => name.clone(),
            other => other.to_string(),
        });
        let property_count = schema
            .get("properties")
            .and_then(Value::as_object)
            .map_or(0, |p| p.len());
        let required_count = schema
            .get("required")
            .and_then(Value::as_array)
            .map_or(0, |r| r.len());

        Self {
            schema_type,
            property_count,
            required_count,
        }
    }
}

/// Data attached to a lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationTrace {
    pub task_id: TaskId,
    pub kind: TaskKind,
    /// Time since the task was submitted (complete/error only)
    pub duration_ms: Option<u64>,
    /// Validity of a single-item validation
    pub valid: Option<bool>,
    /// Number of items in a batch
    pub batch_size: Option<usize>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationTrace {
    pub(crate) fn new(task_id: TaskId, kind: TaskKind) -> Self {
        Self {
            task_id,
            kind,
            duration_ms: None,
            valid: None,
            batch_size: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub(crate) fn with_valid(mut self, valid: bool) -> Self {
        self.valid = Some(valid);
        self
    }

    pub(crate) fn with_batch_size(mut self, size: Option<usize>) -> Self {
        self.batch_size = size;
        self
    }

    pub(crate) fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A lifecycle event waiting to be delivered to the sink
#[derive(Debug, Clone)]
pub(crate) struct DiagnosticRecord {
    pub event: ValidationEvent,
    pub schema: SchemaSummary,
    pub trace: ValidationTrace,
}

/// Sink for validation lifecycle events
pub trait ValidationDiagnostics: Send + Sync {
    /// Name of this sink (for logging)
    fn name(&self) -> &'static str;

    /// Record one lifecycle transition
    fn track_validation(&self, event: ValidationEvent, schema: &SchemaSummary, trace: &ValidationTrace);
}

/// Sink that writes lifecycle events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl ValidationDiagnostics for TracingDiagnostics {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn track_validation(&self, event: ValidationEvent, schema: &SchemaSummary, trace: &ValidationTrace) {
        match event {
            ValidationEvent::Start => debug!(
                task_id = trace.task_id,
                kind = %trace.kind,
                schema_type = schema.schema_type.as_deref().unwrap_or("-"),
                properties = schema.property_count,
                batch_size = ?trace.batch_size,
                "Validation started"
            ),
            ValidationEvent::Complete => debug!(
                task_id = trace.task_id,
                kind = %trace.kind,
                duration_ms = ?trace.duration_ms,
                valid = ?trace.valid,
                batch_size = ?trace.batch_size,
                "Validation completed"
            ),
            ValidationEvent::Error => warn!(
                task_id = trace.task_id,
                kind = %trace.kind,
                duration_ms = ?trace.duration_ms,
                error = trace.error.as_deref().unwrap_or("unknown"),
                "Validation failed"
            ),
        }
    }
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiagnostics;

impl ValidationDiagnostics for NoopDiagnostics {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn track_validation(&self, _: ValidationEvent, _: &SchemaSummary, _: &ValidationTrace) {}
}
