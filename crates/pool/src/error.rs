// Error types for the validator pool

use std::time::Duration;

use thiserror::Error;

use crate::context::ContextId;
use crate::protocol::{ErrorKind, ErrorPayload};

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors surfaced to pool callers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    /// Some execution contexts did not finish their handshake in time
    #[error("execution contexts {pending:?} did not complete initialization within {timeout:?}")]
    InitTimeout {
        pending: Vec<ContextId>,
        timeout: Duration,
    },

    /// An execution context failed while initializing
    #[error("execution context {context_id} failed to initialize: {message}")]
    InitFailed {
        context_id: ContextId,
        message: String,
    },

    /// The schema could not be compiled
    #[error("schema compilation failed: {0}")]
    SchemaCompile(String),

    /// A task reached an execution context whose engine was not constructed
    #[error("validator engine not initialized")]
    EngineUninitialized,

    /// The execution context reported a processing failure
    #[error("task processing failed: {0}")]
    Processing(String),

    /// The execution context servicing the task crashed or became unreachable
    #[error("execution context {context_id} failed: {reason}")]
    TransportFailure {
        context_id: ContextId,
        reason: String,
    },

    /// The pool was torn down before the task settled
    #[error("validator pool was destroyed")]
    PoolDestroyed,

    /// Every execution context has crashed
    #[error("no live execution contexts remain in the pool")]
    NoLiveContexts,

    /// An execution context thread could not be started
    #[error("failed to spawn execution context: {0}")]
    Spawn(String),
}

impl PoolError {
    /// Build an error from an execution context's error envelope
    pub fn from_payload(payload: ErrorPayload) -> Self {
        match payload.kind {
            ErrorKind::EngineUninitialized => PoolError::EngineUninitialized,
            ErrorKind::SchemaCompile => PoolError::SchemaCompile(payload.message),
            ErrorKind::Processing => PoolError::Processing(payload.message),
        }
    }

    /// Whether the failure is tied to the task's own input rather than the pool
    pub fn is_task_error(&self) -> bool {
        matches!(self, PoolError::SchemaCompile(_) | PoolError::Processing(_))
    }
}
