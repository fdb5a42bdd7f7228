//! # Schema Validation Worker Pool
//!
//! A bounded set of execution contexts (OS threads) that compile JSON schemas and
//! validate documents in parallel, coordinated by an orchestrator that queues
//! overflow work and correlates responses to the tasks that produced them.
//!
//! ## Features
//!
//! - **Bounded parallelism**: at most `pool_size` tasks run at once; the rest wait FIFO
//! - **Ajv-style mutation**: defaults, type coercion and property stripping are applied
//!   to the validated item and handed back to the caller
//! - **Crash isolation**: a panicking context fails only its own task
//! - **Diagnostics**: every task start, completion and failure reaches a pluggable sink
//!
//! ## Example
//!
//! ```ignore
//! use schemaworks_pool::prelude::*;
//! use serde_json::json;
//!
//! let handle = PoolHandle::new();
//! let pool = handle.get(Some(PoolConfig::from_env()));
//!
//! let results = pool
//!     .validate_batch(json!({"type": "integer"}), vec![json!(1), json!("2"), json!("x")])
//!     .await?;
//! assert_eq!(results.len(), 3);
//!
//! handle.destroy().await;
//! ```

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod handle;
pub mod pool;
pub mod protocol;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::PoolConfig;
    pub use crate::diagnostics::{ValidationDiagnostics, ValidationEvent};
    pub use crate::error::PoolError;
    pub use crate::handle::PoolHandle;
    pub use crate::pool::{PoolStats, ValidatorPool};
    pub use crate::protocol::{BatchItemOutcome, ErrorRecord, ValidationOutcome};
}

// Re-export key types at crate root
pub use config::PoolConfig;
pub use context::{schema_context_factory, ContextHandler, ContextId, HandlerFactory, SchemaContext};
pub use diagnostics::{
    NoopDiagnostics, SchemaSummary, TracingDiagnostics, ValidationDiagnostics, ValidationEvent,
    ValidationTrace,
};
pub use engine::{EngineError, EngineOptions, ValidatorEngine};
pub use error::{PoolError, Result};
pub use handle::PoolHandle;
pub use pool::{PoolStats, PoolStatus, ValidatorPool};
pub use protocol::{
    BatchItemOutcome, ErrorKind, ErrorPayload, ErrorRecord, Request, Response, TaskId, TaskKind,
    ValidationOutcome,
};
