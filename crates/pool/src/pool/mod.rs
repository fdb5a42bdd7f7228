//! Validator pool orchestrator
//!
//! Owns the execution contexts and exposes the public API. Every state
//! transition happens under one `parking_lot` mutex around [`state::PoolState`];
//! a single tokio task consumes context events and settles correlated tasks.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        ValidatorPool                           │
//! │  validate / validate_batch / compile                           │
//! │        │                                                       │
//! │        ▼                                                       │
//! │  ┌──────────────────────────────┐     ┌─────────────────────┐  │
//! │  │ PoolState (mutex)             │◀────│  Event loop (tokio) │  │
//! │  │ available (LIFO) busy pending │     │  correlates by id   │  │
//! │  └──────────────┬───────────────┘     └──────────▲──────────┘  │
//! │                 │ Request                         │ Response    │
//! │                 ▼                                 │             │
//! │  [context 0] [context 1] ... [context N-1]   (OS threads)      │
//! └───────────────────────────────────────────────────────────────┘
//! ```

mod state;

pub use state::{PoolStats, PoolStatus};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::PoolConfig;
use crate::context::{schema_context_factory, ContextEvent, ContextHandle, HandlerFactory};
use crate::diagnostics::{DiagnosticRecord, TracingDiagnostics, ValidationDiagnostics};
use crate::error::{PoolError, Result};
use crate::protocol::{BatchItemOutcome, Request, TaskKind, ValidationOutcome};
use state::{PoolState, TaskInput, TaskOutput};

/// Poll interval while waiting for context threads to exit
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A bounded pool of schema-validation execution contexts
///
/// # Example
///
/// ```ignore
/// use schemaworks_pool::{PoolConfig, ValidatorPool};
/// use serde_json::json;
///
/// let pool = ValidatorPool::new(PoolConfig::new().with_pool_size(4));
///
/// // Initialization is lazy; calling init() up front surfaces handshake failures early
/// pool.init().await?;
///
/// let outcome = pool
///     .validate(json!({"type": "object", "required": ["id"]}), json!({}))
///     .await?;
/// assert!(!outcome.valid);
///
/// pool.destroy().await;
/// ```
pub struct ValidatorPool {
    config: PoolConfig,
    state: Arc<Mutex<PoolState>>,
    diagnostics: Arc<dyn ValidationDiagnostics>,
    handler_factory: HandlerFactory,
    init_lock: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<PoolStatus>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    next_context_id: AtomicUsize,
}

impl ValidatorPool {
    /// Create a pool; no contexts are spawned until `init` or the first task
    pub fn new(config: PoolConfig) -> Self {
        let (status_tx, _) = watch::channel(PoolStatus::Uninitialized);
        let handler_factory = schema_context_factory(config.engine);

        Self {
            config,
            state: Arc::new(Mutex::new(PoolState::new())),
            diagnostics: Arc::new(TracingDiagnostics),
            handler_factory,
            init_lock: tokio::sync::Mutex::new(()),
            status_tx,
            event_loop: Mutex::new(None),
            next_context_id: AtomicUsize::new(0),
        }
    }

    /// Set the diagnostics sink
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn ValidationDiagnostics>) -> Self {
        debug!(sink = diagnostics.name(), "Diagnostics sink attached");
        self.diagnostics = diagnostics;
        self
    }

    /// Replace the handler each execution context runs
    pub fn with_handler_factory(mut self, factory: HandlerFactory) -> Self {
        self.handler_factory = factory;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current lifecycle status
    pub fn status(&self) -> PoolStatus {
        self.state.lock().status()
    }

    /// Watch the lifecycle status; flips to `Ready` when `init` succeeds
    pub fn subscribe_ready(&self) -> watch::Receiver<PoolStatus> {
        self.status_tx.subscribe()
    }

    /// Point-in-time counters; never mutates the pool
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats(self.config.pool_size)
    }

    /// Spawn the execution contexts and wait for every handshake.
    ///
    /// Idempotent: returns immediately when the pool is ready, and concurrent
    /// callers share one initialization. Contexts that completed their handshake
    /// before a timeout stay spawned until the next attempt or `destroy`.
    #[instrument(skip(self), fields(pool_size = self.config.pool_size))]
    pub async fn init(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.status() == PoolStatus::Ready {
            return Ok(());
        }

        let leftovers = self.state.lock().begin_init();
        if !leftovers.is_empty() {
            debug!(count = leftovers.len(), "Terminating contexts from a failed initialization");
        }
        leftovers.into_iter().for_each(|handle| drop(handle.terminate()));
        self.status_tx.send_replace(PoolStatus::Initializing);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let event_loop = tokio::spawn(run_event_loop(
            Arc::clone(&self.state),
            Arc::clone(&self.diagnostics),
            events_rx,
        ));
        if let Some(previous) = self.event_loop.lock().replace(event_loop) {
            previous.abort();
        }

        let mut handshakes = Vec::with_capacity(self.config.pool_size);
        for _ in 0..self.config.pool_size {
            let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
            let handle = match ContextHandle::spawn(id, (self.handler_factory)(id), events_tx.clone()) {
                Ok(handle) => handle,
                Err(e) => {
                    self.abort_init();
                    return Err(e);
                }
            };

            let (handshake_tx, handshake_rx) = oneshot::channel();
            // Register under the lock so the event loop cannot see the answer first
            let sent = {
                let mut state = self.state.lock();
                let sent = handle.send(Request::Init);
                state.register_starting(handle, handshake_tx);
                sent
            };
            if let Err(e) = sent {
                self.abort_init();
                return Err(e);
            }
            handshakes.push(handshake_rx);
        }
        drop(events_tx);

        let timeout = self.config.init_timeout;
        let results = match tokio::time::timeout(timeout, join_all(handshakes)).await {
            Ok(results) => results,
            Err(_) => {
                let pending = self.state.lock().abandon_handshakes();
                self.status_tx.send_replace(PoolStatus::Uninitialized);
                warn!(?pending, ?timeout, "Execution context handshake timed out");
                return Err(PoolError::InitTimeout { pending, timeout });
            }
        };

        for result in results {
            // A dropped handshake means the pool was torn down meanwhile
            let outcome = result.unwrap_or(Err(PoolError::PoolDestroyed));
            if let Err(e) = outcome {
                self.abort_init();
                warn!(error = %e, "Validator pool initialization failed");
                return Err(e);
            }
        }

        if !self.state.lock().activate() {
            return Err(PoolError::PoolDestroyed);
        }
        self.status_tx.send_replace(PoolStatus::Ready);
        info!(pool_size = self.config.pool_size, "Validator pool ready");
        Ok(())
    }

    fn abort_init(&self) {
        self.state.lock().fail_init();
        self.status_tx.send_replace(PoolStatus::Uninitialized);
    }

    /// Validate one item; the outcome carries the item after mutation
    #[instrument(skip_all)]
    pub async fn validate(&self, schema: Value, item: Value) -> Result<ValidationOutcome> {
        match self.submit(TaskKind::Validate, schema, TaskInput::Item(item)).await? {
            TaskOutput::Validated(outcome) => Ok(outcome),
            other => Err(unexpected_output(TaskKind::Validate, &other)),
        }
    }

    /// Validate many items against one compilation; results follow input order
    #[instrument(skip_all, fields(batch_size = items.len()))]
    pub async fn validate_batch(
        &self,
        schema: Value,
        items: Vec<Value>,
    ) -> Result<Vec<BatchItemOutcome>> {
        match self
            .submit(TaskKind::ValidateBatch, schema, TaskInput::Items(items))
            .await?
        {
            TaskOutput::Batch(results) => Ok(results),
            other => Err(unexpected_output(TaskKind::ValidateBatch, &other)),
        }
    }

    /// Compile a schema in a context without validating anything
    #[instrument(skip_all)]
    pub async fn compile(&self, schema: Value) -> Result<()> {
        match self.submit(TaskKind::Compile, schema, TaskInput::None).await? {
            TaskOutput::Compiled => Ok(()),
            other => Err(unexpected_output(TaskKind::Compile, &other)),
        }
    }

    async fn submit(&self, kind: TaskKind, schema: Value, input: TaskInput) -> Result<TaskOutput> {
        if self.status() != PoolStatus::Ready {
            self.init().await?;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let notes = {
            let mut state = self.state.lock();
            state.submit(kind, schema, input, reply_tx);
            state.take_notes()
        };
        emit(self.diagnostics.as_ref(), notes);

        reply_rx.await.unwrap_or(Err(PoolError::PoolDestroyed))
    }

    /// Terminate every context and reset to uninitialized.
    ///
    /// Outstanding tasks are rejected with [`PoolError::PoolDestroyed`]. Context
    /// threads get `shutdown_timeout` to exit and are detached after that.
    #[instrument(skip(self))]
    pub async fn destroy(&self) {
        if let Some(event_loop) = self.event_loop.lock().take() {
            event_loop.abort();
        }

        let (handles, notes) = {
            let mut state = self.state.lock();
            let handles = state.teardown();
            (handles, state.take_notes())
        };
        emit(self.diagnostics.as_ref(), notes);
        self.status_tx.send_replace(PoolStatus::Uninitialized);

        let threads: Vec<_> = handles
            .into_iter()
            .filter_map(ContextHandle::terminate)
            .collect();
        let count = threads.len();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let running = threads.iter().filter(|t| !t.is_finished()).count();
            if running == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(running, "Shutdown timeout reached; detaching execution contexts");
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        info!(contexts = count, "Validator pool destroyed");
    }
}

impl Drop for ValidatorPool {
    fn drop(&mut self) {
        // Context threads exit once their request channels drop with the state
        if let Some(event_loop) = self.event_loop.get_mut().take() {
            event_loop.abort();
        }
    }
}

async fn run_event_loop(
    state: Arc<Mutex<PoolState>>,
    diagnostics: Arc<dyn ValidationDiagnostics>,
    mut events: mpsc::UnboundedReceiver<ContextEvent>,
) {
    while let Some(event) = events.recv().await {
        let notes = {
            let mut state = state.lock();
            state.on_event(event);
            state.take_notes()
        };
        emit(diagnostics.as_ref(), notes);
    }
    debug!("Context event loop exited");
}

fn emit(diagnostics: &dyn ValidationDiagnostics, notes: Vec<DiagnosticRecord>) {
    for note in notes {
        diagnostics.track_validation(note.event, &note.schema, &note.trace);
    }
}

fn unexpected_output(kind: TaskKind, output: &TaskOutput) -> PoolError {
    let produced = match output {
        TaskOutput::Compiled => TaskKind::Compile,
        TaskOutput::Validated(_) => TaskKind::Validate,
        TaskOutput::Batch(_) => TaskKind::ValidateBatch,
    };
    PoolError::Processing(format!("{} task produced a {} result", kind, produced))
}
