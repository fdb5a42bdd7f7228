//! Orchestrator state machine
//!
//! All bookkeeping of the pool lives here and is mutated synchronously under the
//! pool's lock: which contexts are available or busy, which task each busy context
//! is servicing, and which tasks are waiting. Invariants:
//!
//! - `available` and the keys of `busy` partition the keys of `contexts`
//! - a busy context services exactly one in-flight task
//! - `pending` is dispatched strictly FIFO, `available` is reused LIFO
//! - every reply channel is settled or dropped exactly once

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::context::{ContextEvent, ContextHandle, ContextId};
use crate::diagnostics::{DiagnosticRecord, SchemaSummary, ValidationEvent, ValidationTrace};
use crate::error::{PoolError, Result};
use crate::protocol::{
    BatchItemOutcome, Request, Response, TaskId, TaskKind, ValidationOutcome,
};

/// Lifecycle status of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// No contexts are running
    Uninitialized,
    /// Contexts are spawned and completing their handshake
    Initializing,
    /// Every context completed its handshake; tasks are accepted
    Ready,
}

/// Point-in-time counters of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Configured number of contexts
    pub pool_size: usize,
    pub available_workers: usize,
    pub busy_workers: usize,
    pub pending_tasks: usize,
    /// Live contexts; below `pool_size` once contexts have crashed
    pub total_workers: usize,
}

/// Payload of a task besides its schema
#[derive(Debug)]
pub(crate) enum TaskInput {
    None,
    Item(Value),
    Items(Vec<Value>),
}

/// What a settled task hands back to its caller
#[derive(Debug)]
pub(crate) enum TaskOutput {
    Compiled,
    Validated(ValidationOutcome),
    Batch(Vec<BatchItemOutcome>),
}

pub(crate) type Reply = oneshot::Sender<Result<TaskOutput>>;
pub(crate) type Handshake = oneshot::Sender<Result<()>>;

struct Task {
    id: TaskId,
    kind: TaskKind,
    request: Request,
    schema: SchemaSummary,
    batch_size: Option<usize>,
    submitted: Instant,
    reply: Reply,
}

/// Correlation entry for a dispatched task
struct InFlight {
    context_id: ContextId,
    kind: TaskKind,
    schema: SchemaSummary,
    batch_size: Option<usize>,
    submitted: Instant,
    reply: Reply,
}

pub(crate) struct PoolState {
    status: PoolStatus,
    contexts: HashMap<ContextId, ContextHandle>,
    available: Vec<ContextId>,
    busy: HashMap<ContextId, TaskId>,
    in_flight: HashMap<TaskId, InFlight>,
    pending: VecDeque<Task>,
    starting: HashMap<ContextId, ContextHandle>,
    handshakes: HashMap<ContextId, Handshake>,
    task_counter: TaskId,
    outbox: Vec<DiagnosticRecord>,
}

impl PoolState {
    pub(crate) fn new() -> Self {
        Self {
            status: PoolStatus::Uninitialized,
            contexts: HashMap::new(),
            available: Vec::new(),
            busy: HashMap::new(),
            in_flight: HashMap::new(),
            pending: VecDeque::new(),
            starting: HashMap::new(),
            handshakes: HashMap::new(),
            task_counter: 0,
            outbox: Vec::new(),
        }
    }

    pub(crate) fn status(&self) -> PoolStatus {
        self.status
    }

    pub(crate) fn stats(&self, pool_size: usize) -> PoolStats {
        PoolStats {
            pool_size,
            available_workers: self.available.len(),
            busy_workers: self.busy.len(),
            pending_tasks: self.pending.len(),
            total_workers: self.contexts.len(),
        }
    }

    /// Drain diagnostics produced by the last transitions
    pub(crate) fn take_notes(&mut self) -> Vec<DiagnosticRecord> {
        std::mem::take(&mut self.outbox)
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Enter `Initializing`, returning contexts left over from a failed attempt
    pub(crate) fn begin_init(&mut self) -> Vec<ContextHandle> {
        self.status = PoolStatus::Initializing;
        self.handshakes.clear();
        self.starting.drain().map(|(_, handle)| handle).collect()
    }

    /// Track a spawned context until its handshake completes
    pub(crate) fn register_starting(&mut self, handle: ContextHandle, handshake: Handshake) {
        let id = handle.id();
        self.handshakes.insert(id, handshake);
        self.starting.insert(id, handle);
    }

    /// Give up on handshakes still outstanding; their contexts stay spawned
    pub(crate) fn abandon_handshakes(&mut self) -> Vec<ContextId> {
        let mut pending: Vec<ContextId> = self.handshakes.drain().map(|(id, _)| id).collect();
        pending.sort_unstable();
        if self.status == PoolStatus::Initializing {
            self.status = PoolStatus::Uninitialized;
        }
        pending
    }

    /// Leave `Initializing` without activating anything
    pub(crate) fn fail_init(&mut self) {
        self.handshakes.clear();
        if self.status == PoolStatus::Initializing {
            self.status = PoolStatus::Uninitialized;
        }
    }

    /// Promote every handshaken context to available and mark the pool ready.
    ///
    /// Returns `false` when initialization was interrupted by a teardown.
    pub(crate) fn activate(&mut self) -> bool {
        if self.status != PoolStatus::Initializing {
            return false;
        }

        let mut ids: Vec<ContextId> = self.starting.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(handle) = self.starting.remove(&id) {
                self.contexts.insert(id, handle);
                self.available.push(id);
            }
        }
        self.handshakes.clear();
        self.status = PoolStatus::Ready;
        true
    }

    // ------------------------------------------------------------------
    // Task submission and dispatch
    // ------------------------------------------------------------------

    /// Accept a task: dispatch it to a free context or queue it
    pub(crate) fn submit(&mut self, kind: TaskKind, schema: Value, input: TaskInput, reply: Reply) {
        if self.status != PoolStatus::Ready {
            let _ = reply.send(Err(PoolError::PoolDestroyed));
            return;
        }

        self.task_counter += 1;
        let id = self.task_counter;
        let summary = SchemaSummary::of(&schema);
        let batch_size = match &input {
            TaskInput::Items(items) => Some(items.len()),
            _ => None,
        };
        let request = match (kind, input) {
            (TaskKind::Compile, _) => Request::Compile { id, schema },
            (TaskKind::Validate, TaskInput::Item(item)) => Request::Validate { id, schema, item },
            (TaskKind::Validate, _) => Request::Validate {
                id,
                schema,
                item: Value::Null,
            },
            (TaskKind::ValidateBatch, TaskInput::Items(items)) => {
                Request::ValidateBatch { id, schema, items }
            }
            (TaskKind::ValidateBatch, _) => Request::ValidateBatch {
                id,
                schema,
                items: Vec::new(),
            },
        };

        self.outbox.push(DiagnosticRecord {
            event: ValidationEvent::Start,
            schema: summary.clone(),
            trace: ValidationTrace::new(id, kind).with_batch_size(batch_size),
        });

        let task = Task {
            id,
            kind,
            request,
            schema: summary,
            batch_size,
            submitted: Instant::now(),
            reply,
        };

        if self.contexts.is_empty() {
            self.reject(task, PoolError::NoLiveContexts);
            return;
        }

        match self.available.pop() {
            Some(context_id) => self.dispatch(context_id, task),
            None => {
                debug!(task_id = id, queued = self.pending.len() + 1, "All contexts busy; task queued");
                self.pending.push_back(task);
            }
        }
    }

    /// Hand `task` to `context_id`, which must have just left `available`
    fn dispatch(&mut self, context_id: ContextId, task: Task) {
        let Task {
            id,
            kind,
            request,
            schema,
            batch_size,
            submitted,
            reply,
        } = task;

        self.busy.insert(context_id, id);
        self.in_flight.insert(
            id,
            InFlight {
                context_id,
                kind,
                schema,
                batch_size,
                submitted,
                reply,
            },
        );

        let sent = match self.contexts.get(&context_id) {
            Some(handle) => handle.send(request),
            None => Err(PoolError::TransportFailure {
                context_id,
                reason: "execution context is gone".to_string(),
            }),
        };

        match sent {
            Ok(()) => debug!(task_id = id, context_id, kind = %kind, "Task dispatched"),
            Err(e) => self.on_crash(context_id, &e.to_string()),
        }
    }

    /// Return a context to service, preferring the oldest queued task
    fn release(&mut self, context_id: ContextId) {
        match self.pending.pop_front() {
            Some(task) => self.dispatch(context_id, task),
            None => self.available.push(context_id),
        }
    }

    // ------------------------------------------------------------------
    // Context events
    // ------------------------------------------------------------------

    pub(crate) fn on_event(&mut self, event: ContextEvent) {
        match event {
            ContextEvent::Message {
                context_id,
                response,
            } => self.on_response(context_id, response),
            ContextEvent::Crashed { context_id, reason } => self.on_crash(context_id, &reason),
        }
    }

    fn on_response(&mut self, context_id: ContextId, response: Response) {
        if let Some(handshake) = self.handshakes.remove(&context_id) {
            let result = match response {
                Response::InitComplete => Ok(()),
                Response::Error { error, .. } => Err(PoolError::InitFailed {
                    context_id,
                    message: error.message,
                }),
                other => {
                    // Not a handshake answer; keep waiting
                    warn!(context_id, ?other, "Unexpected response during handshake");
                    self.handshakes.insert(context_id, handshake);
                    return;
                }
            };
            debug!(context_id, ok = result.is_ok(), "Handshake settled");
            let _ = handshake.send(result);
            return;
        }

        let Some(&task_id) = self.busy.get(&context_id) else {
            warn!(context_id, response_id = ?response.id(), "Response from idle execution context dropped");
            return;
        };

        let Some(kind) = self.in_flight.get(&task_id).map(|entry| entry.kind) else {
            error!(context_id, task_id, "Busy context has no correlation entry");
            self.busy.remove(&context_id);
            self.release(context_id);
            return;
        };

        if !response.correlates_with(kind, task_id) {
            warn!(
                context_id,
                task_id,
                response_id = ?response.id(),
                "Uncorrelated response dropped"
            );
            return;
        }

        self.busy.remove(&context_id);
        let Some(entry) = self.in_flight.remove(&task_id) else {
            return;
        };

        let result = match response {
            Response::CompileComplete { .. } => Ok(TaskOutput::Compiled),
            Response::ValidateComplete { outcome, .. } => Ok(TaskOutput::Validated(outcome)),
            Response::ValidateBatchComplete { results, .. } => Ok(TaskOutput::Batch(results)),
            Response::Error { error, .. } => Err(PoolError::from_payload(error)),
            Response::InitComplete => Err(PoolError::Processing(
                "unexpected init-complete response".to_string(),
            )),
        };

        self.settle(task_id, entry, result);
        self.release(context_id);
    }

    /// A context died: fail its work and drop it from the pool for good
    fn on_crash(&mut self, context_id: ContextId, reason: &str) {
        if let Some(handshake) = self.handshakes.remove(&context_id) {
            self.starting.remove(&context_id);
            let _ = handshake.send(Err(PoolError::InitFailed {
                context_id,
                message: reason.to_string(),
            }));
            return;
        }

        if self.contexts.remove(&context_id).is_none() {
            debug!(context_id, "Crash reported for unknown execution context");
            return;
        }
        self.available.retain(|id| *id != context_id);

        if let Some(task_id) = self.busy.remove(&context_id) {
            if let Some(entry) = self.in_flight.remove(&task_id) {
                let error = PoolError::TransportFailure {
                    context_id,
                    reason: reason.to_string(),
                };
                self.settle(task_id, entry, Err(error));
            }
        }

        warn!(
            context_id,
            remaining = self.contexts.len(),
            "Execution context lost; pool capacity reduced"
        );

        if self.contexts.is_empty() {
            while let Some(task) = self.pending.pop_front() {
                self.reject(task, PoolError::NoLiveContexts);
            }
        }
    }

    /// Deliver a result to the caller and record the matching diagnostic
    fn settle(&mut self, task_id: TaskId, entry: InFlight, result: Result<TaskOutput>) {
        let elapsed = entry.submitted.elapsed();
        let trace = ValidationTrace::new(task_id, entry.kind)
            .with_duration(elapsed)
            .with_batch_size(entry.batch_size);

        let (event, trace) = match &result {
            Ok(TaskOutput::Validated(outcome)) => {
                (ValidationEvent::Complete, trace.with_valid(outcome.valid))
            }
            Ok(_) => (ValidationEvent::Complete, trace),
            Err(e) => (ValidationEvent::Error, trace.with_error(e.to_string())),
        };
        self.outbox.push(DiagnosticRecord {
            event,
            schema: entry.schema,
            trace,
        });

        match &result {
            Err(e) if !e.is_task_error() => {
                warn!(task_id, context_id = entry.context_id, error = %e, "Task failed outside its input");
            }
            _ => {
                debug!(task_id, context_id = entry.context_id, ok = result.is_ok(), "Task settled");
            }
        }
        // The caller may have stopped waiting
        let _ = entry.reply.send(result);
    }

    /// Fail a task that never reached a context
    fn reject(&mut self, task: Task, error: PoolError) {
        let trace = ValidationTrace::new(task.id, task.kind)
            .with_duration(task.submitted.elapsed())
            .with_batch_size(task.batch_size)
            .with_error(error.to_string());
        self.outbox.push(DiagnosticRecord {
            event: ValidationEvent::Error,
            schema: task.schema,
            trace,
        });
        let _ = task.reply.send(Err(error));
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Reject every outstanding task and reset to uninitialized.
    ///
    /// Returns the handles of every spawned context so the caller can terminate them.
    pub(crate) fn teardown(&mut self) -> Vec<ContextHandle> {
        let in_flight: Vec<(TaskId, InFlight)> = self.in_flight.drain().collect();
        for (task_id, entry) in in_flight {
            self.settle(task_id, entry, Err(PoolError::PoolDestroyed));
        }
        while let Some(task) = self.pending.pop_front() {
            self.reject(task, PoolError::PoolDestroyed);
        }

        // Dropping the senders fails any init() still waiting
        self.handshakes.clear();
        self.busy.clear();
        self.available.clear();
        self.task_counter = 0;
        self.status = PoolStatus::Uninitialized;

        self.contexts
            .drain()
            .chain(self.starting.drain())
            .map(|(_, handle)| handle)
            .collect()
    }
}
