//! Execution contexts
//!
//! Each context is a dedicated OS thread hosting one [`ContextHandler`]. Requests
//! arrive on an unbounded channel and are processed strictly one at a time; every
//! response is forwarded to the pool's event channel tagged with the context id.
//!
//! A panic inside the handler is treated as a crash: the thread reports a
//! [`ContextEvent::Crashed`] for itself and exits. Contexts are never respawned.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::engine::{EngineError, EngineOptions, ValidatorEngine};
use crate::error::PoolError;
use crate::protocol::{ErrorKind, ErrorPayload, Request, Response, TaskId};

/// Execution context identifier, unique for the lifetime of a pool value
pub type ContextId = usize;

/// Request processing logic hosted by an execution context
pub trait ContextHandler: Send + 'static {
    /// Handle one request. Returning `None` leaves the request unanswered.
    fn handle(&mut self, request: Request) -> Option<Response>;
}

/// Builds the handler for a newly spawned context
pub type HandlerFactory = Arc<dyn Fn(ContextId) -> Box<dyn ContextHandler> + Send + Sync>;

/// Factory producing [`SchemaContext`] handlers
pub fn schema_context_factory(options: EngineOptions) -> HandlerFactory {
    Arc::new(move |_: ContextId| {
        Box::new(SchemaContext::new(options)) as Box<dyn ContextHandler>
    })
}

/// The production handler: a validator engine constructed on `init`
pub struct SchemaContext {
    options: EngineOptions,
    engine: Option<ValidatorEngine>,
}

impl SchemaContext {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            engine: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    fn engine(&self) -> Result<&ValidatorEngine, EngineError> {
        self.engine.as_ref().ok_or(EngineError::Uninitialized)
    }

    fn process(&mut self, request: Request) -> Result<Response, EngineError> {
        match request {
            Request::Init => {
                self.engine = Some(ValidatorEngine::new(self.options));
                Ok(Response::InitComplete)
            }
            Request::Compile { id, schema } => {
                self.engine()?.compile(&schema)?;
                Ok(Response::CompileComplete { id })
            }
            Request::Validate { id, schema, item } => {
                let outcome = self.engine()?.compile(&schema)?.validate(item);
                Ok(Response::ValidateComplete { id, outcome })
            }
            Request::ValidateBatch { id, schema, items } => {
                let results = self.engine()?.compile(&schema)?.validate_batch(items);
                Ok(Response::ValidateBatchComplete { id, results })
            }
        }
    }
}

impl ContextHandler for SchemaContext {
    fn handle(&mut self, request: Request) -> Option<Response> {
        let id = request.id();
        let response = self.process(request).unwrap_or_else(|e| Response::Error {
            id,
            error: error_payload(&e),
        });
        Some(response)
    }
}

fn error_payload(error: &EngineError) -> ErrorPayload {
    match error {
        EngineError::Uninitialized => {
            ErrorPayload::from_error(ErrorKind::EngineUninitialized, error)
        }
        EngineError::SchemaCompile(message) => ErrorPayload {
            kind: ErrorKind::SchemaCompile,
            message: message.clone(),
            causes: vec![],
        },
    }
}

/// Events flowing from contexts back to the pool
#[derive(Debug)]
pub(crate) enum ContextEvent {
    Message {
        context_id: ContextId,
        response: Response,
    },
    Crashed {
        context_id: ContextId,
        reason: String,
    },
}

/// Orchestrator-side handle of a running context
pub(crate) struct ContextHandle {
    id: ContextId,
    requests: mpsc::UnboundedSender<Request>,
    thread: Option<JoinHandle<()>>,
}

impl ContextHandle {
    /// Start a context thread running `handler`
    pub(crate) fn spawn(
        id: ContextId,
        handler: Box<dyn ContextHandler>,
        events: mpsc::UnboundedSender<ContextEvent>,
    ) -> Result<Self, PoolError> {
        let (requests, inbox) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name(format!("schema-context-{}", id))
            .spawn(move || run_context(id, handler, inbox, events))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        Ok(Self {
            id,
            requests,
            thread: Some(thread),
        })
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    /// Queue a request for the context
    pub(crate) fn send(&self, request: Request) -> Result<(), PoolError> {
        self.requests
            .send(request)
            .map_err(|_| PoolError::TransportFailure {
                context_id: self.id,
                reason: "request channel closed".to_string(),
            })
    }

    /// Close the request channel; the thread exits after its current request
    pub(crate) fn terminate(mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }

    /// Handle with no thread behind it, for exercising pool state directly
    #[cfg(test)]
    pub(crate) fn detached(id: ContextId) -> (Self, mpsc::UnboundedReceiver<Request>) {
        let (requests, inbox) = mpsc::unbounded_channel();
        (
            Self {
                id,
                requests,
                thread: None,
            },
            inbox,
        )
    }
}

fn run_context(
    id: ContextId,
    mut handler: Box<dyn ContextHandler>,
    mut inbox: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<ContextEvent>,
) {
    debug!(context_id = id, "Execution context started");

    while let Some(request) = inbox.blocking_recv() {
        debug!(context_id = id, task_id = ?request.id(), kind = ?request.kind(), "Handling request");
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
            Ok(Some(response)) => {
                let event = ContextEvent::Message {
                    context_id: id,
                    response,
                };
                if events.send(event).is_err() {
                    // Pool went away
                    break;
                }
            }
            Ok(None) => {}
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(context_id = id, %reason, "Execution context crashed");
                let _ = events.send(ContextEvent::Crashed {
                    context_id: id,
                    reason,
                });
                return;
            }
        }
    }

    debug!(context_id = id, "Execution context stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
