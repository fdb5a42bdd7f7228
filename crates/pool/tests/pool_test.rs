// Integration tests for the validator pool
//
// These drive real execution-context threads through the public API. Handlers
// other than the production SchemaContext are injected through
// `with_handler_factory` to observe concurrency, order, crashes and silent
// handshakes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use schemaworks_pool::{
    ContextHandler, ContextId, EngineOptions, HandlerFactory, PoolConfig, PoolError, PoolHandle, PoolStatus,
    Request, Response, SchemaContext, SchemaSummary, ValidationDiagnostics, ValidationEvent,
    ValidationOutcome, ValidationTrace, ValidatorPool,
};
use serde_json::{json, Value};

fn pool_of(size: usize) -> ValidatorPool {
    ValidatorPool::new(
        PoolConfig::new()
            .with_pool_size(size)
            .with_shutdown_timeout(Duration::from_millis(200)),
    )
}

async fn wait_until(pool: &ValidatorPool, predicate: impl Fn(&ValidatorPool) -> bool) {
    for _ in 0..500 {
        if predicate(pool) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached; stats: {:?}", pool.stats());
}

// =============================================================================
// Test handlers
// =============================================================================

/// Wraps the production handler and tracks how many requests run at once
struct Counting {
    inner: SchemaContext,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ContextHandler for Counting {
    fn handle(&mut self, request: Request) -> Option<Response> {
        if matches!(request, Request::Init) {
            return self.inner.handle(request);
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        let response = self.inner.handle(request);
        self.active.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Records the items it sees, in processing order
struct Recording {
    inner: SchemaContext,
    seen: Arc<Mutex<Vec<Value>>>,
}

impl ContextHandler for Recording {
    fn handle(&mut self, request: Request) -> Option<Response> {
        if let Request::Validate { item, .. } = &request {
            self.seen.lock().push(item.clone());
        }
        self.inner.handle(request)
    }
}

/// Blocks every task until the gate opens
struct Gated {
    inner: SchemaContext,
    open: Arc<AtomicBool>,
}

impl ContextHandler for Gated {
    fn handle(&mut self, request: Request) -> Option<Response> {
        if !matches!(request, Request::Init) {
            while !self.open.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        self.inner.handle(request)
    }
}

/// Panics on the item `"boom"`
struct Volatile {
    inner: SchemaContext,
}

impl ContextHandler for Volatile {
    fn handle(&mut self, request: Request) -> Option<Response> {
        if let Request::Validate { item, .. } = &request {
            if item == "boom" {
                panic!("validator blew up");
            }
        }
        self.inner.handle(request)
    }
}

/// Never answers the handshake
struct Silent;

impl ContextHandler for Silent {
    fn handle(&mut self, _request: Request) -> Option<Response> {
        None
    }
}

/// Refuses the handshake
struct Refusing;

impl ContextHandler for Refusing {
    fn handle(&mut self, request: Request) -> Option<Response> {
        Some(Response::Error {
            id: request.id(),
            error: schemaworks_pool::ErrorPayload {
                kind: schemaworks_pool::ErrorKind::Processing,
                message: "engine unavailable".to_string(),
                causes: vec![],
            },
        })
    }
}

fn factory<H, F>(build: F) -> HandlerFactory
where
    H: ContextHandler,
    F: Fn() -> H + Send + Sync + 'static,
{
    Arc::new(move |_: ContextId| Box::new(build()) as Box<dyn ContextHandler>)
}

fn production() -> SchemaContext {
    SchemaContext::new(EngineOptions::default())
}

#[derive(Default)]
struct RecordingDiagnostics {
    events: Mutex<Vec<(ValidationEvent, SchemaSummary, ValidationTrace)>>,
}

impl ValidationDiagnostics for RecordingDiagnostics {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn track_validation(
        &self,
        event: ValidationEvent,
        schema: &SchemaSummary,
        trace: &ValidationTrace,
    ) {
        self.events
            .lock()
            .push((event, schema.clone(), trace.clone()));
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_overflow_tasks_queue_and_all_resolve() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pool = {
        let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
        pool_of(2).with_handler_factory(factory(move || Counting {
            inner: production(),
            active: Arc::clone(&active),
            peak: Arc::clone(&peak),
        }))
    };
    pool.init().await.unwrap();

    let calls = (0..5).map(|_| pool.validate(json!({"type": "object"}), json!({})));
    let submitted = async {
        // Let every call reach the queue before inspecting it
        tokio::task::yield_now().await;
        pool.stats()
    };
    let (results, stats) = tokio::join!(join_all(calls), submitted);

    assert_eq!(stats.busy_workers, 2);
    assert_eq!(stats.pending_tasks, 3);
    for result in results {
        let outcome = result.unwrap();
        assert!(outcome.valid);
        assert!(outcome.errors.is_empty());
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);

    let stats = pool.stats();
    assert_eq!(stats.available_workers, 2);
    assert_eq!(stats.pending_tasks, 0);
    pool.destroy().await;
}

#[tokio::test]
async fn test_minimum_violation_is_reported() {
    let pool = pool_of(1);
    let schema = json!({
        "type": "object",
        "properties": {"age": {"type": "number", "minimum": 0}},
        "required": ["age"]
    });

    let outcome = pool.validate(schema, json!({"age": -5})).await.unwrap();

    assert!(!outcome.valid);
    assert_eq!(outcome.errors.len(), 1);
    let error = &outcome.errors[0];
    assert_eq!(error.keyword, "minimum");
    assert_eq!(error.instance_path, "/age");
    assert_eq!(error.params["limit"], json!(0));
    pool.destroy().await;
}

#[tokio::test]
async fn test_batch_results_follow_input_order() {
    let pool = pool_of(2);
    let schema = json!({
        "type": "object",
        "properties": {"n": {"type": "number"}},
        "required": ["n"]
    });

    let results = pool
        .validate_batch(schema, vec![json!({"n": 1}), json!({}), json!({"n": "x"})])
        .await
        .unwrap();

    let summary: Vec<(usize, bool)> = results.iter().map(|r| (r.index, r.valid)).collect();
    assert_eq!(summary, vec![(0, true), (1, false), (2, false)]);
    assert!(results[0].errors.is_empty());
    assert_eq!(results[1].errors[0].keyword, "required");
    assert_eq!(results[2].errors[0].keyword, "type");
    pool.destroy().await;
}

#[tokio::test]
async fn test_mutation_is_visible_on_the_result() {
    let pool = pool_of(1);
    let schema = json!({
        "type": "object",
        "properties": {"status": {"type": "string", "default": "active"}},
        "additionalProperties": false
    });

    let outcome = pool.validate(schema, json!({"extra": 1})).await.unwrap();

    assert_eq!(
        outcome,
        ValidationOutcome {
            valid: true,
            errors: vec![],
            data: json!({"status": "active"}),
        }
    );
    pool.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_context_times_out_init() {
    let pool = ValidatorPool::new(PoolConfig::new().with_pool_size(2))
        .with_handler_factory(factory(|| Silent));
    let started = tokio::time::Instant::now();

    let error = pool.init().await.unwrap_err();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "gave up early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(11), "gave up late: {:?}", elapsed);
    match error {
        PoolError::InitTimeout { pending, timeout } => {
            assert_eq!(pending.len(), 2);
            assert_eq!(timeout, Duration::from_secs(10));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(pool.status(), PoolStatus::Uninitialized);
}

// =============================================================================
// Orchestration
// =============================================================================

#[tokio::test]
async fn test_queued_tasks_run_in_submission_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pool = {
        let seen = Arc::clone(&seen);
        pool_of(1).with_handler_factory(factory(move || Recording {
            inner: production(),
            seen: Arc::clone(&seen),
        }))
    };
    pool.init().await.unwrap();

    let calls = (0..6).map(|i| pool.validate(json!({}), json!(i)));
    for result in join_all(calls).await {
        assert!(result.unwrap().valid);
    }

    assert_eq!(*seen.lock(), (0..6).map(|i| json!(i)).collect::<Vec<_>>());
    pool.destroy().await;
}

#[tokio::test]
async fn test_malformed_schema_rejects_every_call() {
    let pool = pool_of(2);
    let schema = json!({"type": "object", "properties": {"n": {"minimum": "zero"}}});

    let calls = (0..4).map(|_| pool.validate(schema.clone(), json!({"n": 1})));
    for result in join_all(calls).await {
        assert!(matches!(result, Err(PoolError::SchemaCompile(_))));
    }

    assert!(matches!(
        pool.compile(schema).await,
        Err(PoolError::SchemaCompile(_))
    ));
    pool.compile(json!({"type": "string"})).await.unwrap();
    // Failed tasks leave their contexts usable
    assert_eq!(pool.stats().available_workers, 2);
    pool.destroy().await;
}

#[tokio::test]
async fn test_stats_partition_live_contexts() {
    let open = Arc::new(AtomicBool::new(false));
    let pool = Arc::new({
        let open = Arc::clone(&open);
        pool_of(2).with_handler_factory(factory(move || Gated {
            inner: production(),
            open: Arc::clone(&open),
        }))
    });

    let before = pool.stats();
    assert_eq!(before.total_workers, 0);
    assert_eq!(before.pool_size, 2);

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.validate(json!({}), json!(i)).await })
        })
        .collect();
    wait_until(&pool, |p| p.stats().pending_tasks == 1).await;

    let stats = pool.stats();
    assert_eq!(stats.busy_workers, 2);
    assert_eq!(stats.available_workers, 0);
    assert_eq!(stats.available_workers + stats.busy_workers, stats.total_workers);

    open.store(true, Ordering::SeqCst);
    for call in calls {
        assert!(call.await.unwrap().unwrap().valid);
    }
    let stats = pool.stats();
    assert_eq!(stats.available_workers, 2);
    assert_eq!(stats.busy_workers, 0);
    pool.destroy().await;
}

#[tokio::test]
async fn test_crash_fails_only_its_task() {
    let pool = pool_of(2).with_handler_factory(factory(|| Volatile {
        inner: production(),
    }));
    pool.init().await.unwrap();

    match pool.validate(json!({}), json!("boom")).await {
        Err(PoolError::TransportFailure { reason, .. }) => {
            assert!(reason.contains("validator blew up"));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let stats = pool.stats();
    assert_eq!(stats.pool_size, 2);
    assert_eq!(stats.total_workers, 1);
    assert!(pool.validate(json!({}), json!("fine")).await.unwrap().valid);

    assert!(pool.validate(json!({}), json!("boom")).await.is_err());
    assert_eq!(
        pool.validate(json!({}), json!("fine")).await.unwrap_err(),
        PoolError::NoLiveContexts
    );
    pool.destroy().await;
}

#[tokio::test]
async fn test_destroy_rejects_outstanding_tasks() {
    let open = Arc::new(AtomicBool::new(false));
    let pool = Arc::new({
        let open = Arc::clone(&open);
        pool_of(1).with_handler_factory(factory(move || Gated {
            inner: production(),
            open: Arc::clone(&open),
        }))
    });
    pool.init().await.unwrap();

    let calls: Vec<_> = (0..2)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.validate(json!({}), json!({})).await })
        })
        .collect();
    wait_until(&pool, |p| p.stats().pending_tasks == 1).await;

    pool.destroy().await;
    open.store(true, Ordering::SeqCst);

    for call in calls {
        assert_eq!(call.await.unwrap().unwrap_err(), PoolError::PoolDestroyed);
    }
    assert_eq!(pool.status(), PoolStatus::Uninitialized);
    assert_eq!(pool.stats().total_workers, 0);

    // A destroyed pool initializes again on demand
    assert!(pool.validate(json!({}), json!({})).await.unwrap().valid);
    pool.destroy().await;
}

#[tokio::test]
async fn test_refused_handshake_fails_init() {
    let pool = pool_of(1).with_handler_factory(factory(|| Refusing));

    match pool.validate(json!({}), json!({})).await {
        Err(PoolError::InitFailed { message, .. }) => assert_eq!(message, "engine unavailable"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(pool.status(), PoolStatus::Uninitialized);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_init_is_idempotent_and_signals_ready() {
    let pool = pool_of(3);
    let mut ready = pool.subscribe_ready();
    assert_eq!(*ready.borrow(), PoolStatus::Uninitialized);

    let (first, second) = tokio::join!(pool.init(), pool.init());
    first.unwrap();
    second.unwrap();

    ready
        .wait_for(|status| *status == PoolStatus::Ready)
        .await
        .unwrap();
    assert_eq!(pool.stats().total_workers, 3);

    pool.init().await.unwrap();
    assert_eq!(pool.stats().total_workers, 3);
    pool.destroy().await;
    assert_eq!(*ready.borrow(), PoolStatus::Uninitialized);
}

#[tokio::test]
async fn test_handle_rebuilds_after_destroy() {
    let handle = PoolHandle::new();
    let pool = handle.get(Some(PoolConfig::new().with_pool_size(1)));
    assert!(pool.validate(json!({"type": "integer"}), json!("7")).await.unwrap().valid);

    handle.destroy().await;
    assert_eq!(pool.status(), PoolStatus::Uninitialized);

    let fresh = handle.get(Some(PoolConfig::new().with_pool_size(2)));
    assert_eq!(fresh.config().pool_size, 2);
    assert_eq!(fresh.status(), PoolStatus::Uninitialized);
    fresh.compile(json!({"type": "integer"})).await.unwrap();
    assert_eq!(fresh.stats().total_workers, 2);
    handle.destroy().await;
}

#[tokio::test]
async fn test_diagnostics_see_every_transition() {
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let pool = pool_of(1).with_diagnostics(diagnostics.clone());
    let schema = json!({"type": "object", "properties": {"id": {}}, "required": ["id"]});

    pool.validate(schema.clone(), json!({"id": 1})).await.unwrap();
    pool.validate_batch(schema, vec![json!({}), json!({})]).await.unwrap();
    pool.compile(json!({"minimum": "zero"})).await.unwrap_err();

    let events = diagnostics.events.lock();
    let kinds: Vec<ValidationEvent> = events.iter().map(|(event, _, _)| *event).collect();
    assert_eq!(
        kinds,
        vec![
            ValidationEvent::Start,
            ValidationEvent::Complete,
            ValidationEvent::Start,
            ValidationEvent::Complete,
            ValidationEvent::Start,
            ValidationEvent::Error,
        ]
    );

    let (_, summary, trace) = &events[1];
    assert_eq!(summary.schema_type.as_deref(), Some("object"));
    assert_eq!(summary.required_count, 1);
    assert_eq!(trace.valid, Some(true));
    assert!(trace.duration_ms.is_some());

    assert_eq!(events[3].2.batch_size, Some(2));
    assert!(events[5].2.error.is_some());
    drop(events);
    pool.destroy().await;
}
