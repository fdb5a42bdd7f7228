// Message protocol between the pool orchestrator and execution contexts
//
// Decision: Requests and responses are sum types; the serde representation keeps the
// `{type, data}` envelope shape so the messages stay loggable and replayable as JSON.
// Decision: A response correlates with a task only when both id and kind match.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task identifier, unique and monotonically increasing within one pool lifetime
pub type TaskId = u64;

/// Kind of work a task asks an execution context to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Compile a schema without validating anything
    Compile,
    /// Validate a single item
    Validate,
    /// Validate many items against one compiled schema
    ValidateBatch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Compile => "compile",
            TaskKind::Validate => "validate",
            TaskKind::ValidateBatch => "validate-batch",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request envelope sent to an execution context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Request {
    /// Construct the validator engine
    Init,
    Compile {
        id: TaskId,
        schema: Value,
    },
    Validate {
        id: TaskId,
        schema: Value,
        item: Value,
    },
    ValidateBatch {
        id: TaskId,
        schema: Value,
        items: Vec<Value>,
    },
}

impl Request {
    /// Task id carried by the request (absent only for `Init`)
    pub fn id(&self) -> Option<TaskId> {
        match self {
            Request::Init => None,
            Request::Compile { id, .. }
            | Request::Validate { id, .. }
            | Request::ValidateBatch { id, .. } => Some(*id),
        }
    }

    /// Task kind of the request (absent only for `Init`)
    pub fn kind(&self) -> Option<TaskKind> {
        match self {
            Request::Init => None,
            Request::Compile { .. } => Some(TaskKind::Compile),
            Request::Validate { .. } => Some(TaskKind::Validate),
            Request::ValidateBatch { .. } => Some(TaskKind::ValidateBatch),
        }
    }
}

/// One normalized validation error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// JSON pointer to the offending value in the instance
    pub instance_path: String,
    /// JSON pointer (fragment form) to the failing schema keyword
    pub schema_path: String,
    /// Name of the failing keyword (`minimum`, `required`, ...)
    pub keyword: String,
    /// Keyword-specific details
    pub params: Value,
    /// Human-readable message
    pub message: String,
}

/// Result of validating one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<ErrorRecord>,
    /// The item after defaults, coercion and property stripping were applied
    pub data: Value,
}

/// Result of validating one item of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemOutcome {
    /// Position of the item in the submitted batch
    pub index: usize,
    pub valid: bool,
    pub errors: Vec<ErrorRecord>,
    pub data: Value,
}

/// Classification of a failure reported by an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A task arrived before the engine was constructed
    EngineUninitialized,
    /// The schema could not be compiled
    SchemaCompile,
    /// Any other processing failure
    Processing,
}

/// Error body carried by the `error` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    /// Source chain of the underlying error, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ErrorPayload {
    /// Build a payload from an error, walking its source chain
    pub fn from_error(kind: ErrorKind, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind,
            message: error.to_string(),
            causes,
        }
    }
}

/// Response envelope sent back by an execution context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Response {
    InitComplete,
    CompileComplete {
        id: TaskId,
    },
    ValidateComplete {
        id: TaskId,
        outcome: ValidationOutcome,
    },
    ValidateBatchComplete {
        id: TaskId,
        results: Vec<BatchItemOutcome>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<TaskId>,
        error: ErrorPayload,
    },
}

impl Response {
    /// Task id carried by the response, if any
    pub fn id(&self) -> Option<TaskId> {
        match self {
            Response::InitComplete => None,
            Response::CompileComplete { id }
            | Response::ValidateComplete { id, .. }
            | Response::ValidateBatchComplete { id, .. } => Some(*id),
            Response::Error { id, .. } => *id,
        }
    }

    /// Whether this response settles the task `(kind, id)`.
    ///
    /// Completion responses must match both kind and id. Error responses match on id
    /// alone, and an error without an id settles whatever task the sender is servicing.
    pub fn correlates_with(&self, kind: TaskKind, task_id: TaskId) -> bool {
        match self {
            Response::InitComplete => false,
            Response::CompileComplete { id } => kind == TaskKind::Compile && *id == task_id,
            Response::ValidateComplete { id, .. } => {
                kind == TaskKind::Validate && *id == task_id
            }
            Response::ValidateBatchComplete { id, .. } => {
                kind == TaskKind::ValidateBatch && *id == task_id
            }
            Response::Error { id, .. } => id.map_or(true, |id| id == task_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_shape() {
        let request = Request::Validate {
            id: 7,
            schema: json!({"type": "object"}),
            item: json!({}),
        };

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "validate", "data": {"id": 7, "schema": {"type": "object"}, "item": {}}})
        );

        let batch = serde_json::to_value(Request::ValidateBatch {
            id: 1,
            schema: json!(true),
            items: vec![],
        })
        .unwrap();
        assert_eq!(batch["type"], "validate-batch");
        assert_eq!(serde_json::to_value(Request::Init).unwrap(), json!({"type": "init"}));
    }

    #[test]
    fn test_response_decodes_from_envelope() {
        let decoded: Response = serde_json::from_value(json!({
            "type": "error",
            "data": {"error": {"kind": "schema-compile", "message": "bad schema"}}
        }))
        .unwrap();

        assert_eq!(decoded.id(), None);
        match decoded {
            Response::Error { error, .. } => {
                assert_eq!(error.kind, ErrorKind::SchemaCompile);
                assert!(error.causes.is_empty());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_correlation_requires_kind_and_id() {
        let done = Response::CompileComplete { id: 3 };
        assert!(done.correlates_with(TaskKind::Compile, 3));
        assert!(!done.correlates_with(TaskKind::Compile, 4));
        assert!(!done.correlates_with(TaskKind::Validate, 3));

        let batch = Response::ValidateBatchComplete {
            id: 9,
            results: vec![],
        };
        assert!(batch.correlates_with(TaskKind::ValidateBatch, 9));
        assert!(!batch.correlates_with(TaskKind::Validate, 9));

        assert!(!Response::InitComplete.correlates_with(TaskKind::Validate, 0));
    }

    #[test]
    fn test_error_correlation() {
        let payload = ErrorPayload {
            kind: ErrorKind::Processing,
            message: "boom".into(),
            causes: vec![],
        };
        let with_id = Response::Error {
            id: Some(5),
            error: payload.clone(),
        };
        assert!(with_id.correlates_with(TaskKind::Validate, 5));
        assert!(with_id.correlates_with(TaskKind::Compile, 5));
        assert!(!with_id.correlates_with(TaskKind::Validate, 6));

        let anonymous = Response::Error {
            id: None,
            error: payload,
        };
        assert!(anonymous.correlates_with(TaskKind::ValidateBatch, 42));
    }

    #[test]
    fn test_request_accessors() {
        assert_eq!(Request::Init.id(), None);
        assert_eq!(Request::Init.kind(), None);
        let compile = Request::Compile {
            id: 2,
            schema: json!({}),
        };
        assert_eq!(compile.id(), Some(2));
        assert_eq!(compile.kind(), Some(TaskKind::Compile));
        assert_eq!(TaskKind::ValidateBatch.to_string(), "validate-batch");
    }

    #[test]
    fn test_error_payload_collects_causes() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer failure")]
        struct Outer(#[source] std::io::Error);

        let error = Outer(std::io::Error::new(std::io::ErrorKind::Other, "inner"));
        let payload = ErrorPayload::from_error(ErrorKind::Processing, &error);

        assert_eq!(payload.message, "outer failure");
        assert_eq!(payload.causes, vec!["inner".to_string()]);
    }
}
