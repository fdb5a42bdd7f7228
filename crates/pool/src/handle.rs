// Owned pool handle
//
// Decision: No process-global pool. The composition root owns a PoolHandle and passes
// it to whatever needs validation; the handle builds its pool on first access and can
// be torn down so the next access builds a fresh one.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::PoolConfig;
use crate::context::HandlerFactory;
use crate::diagnostics::{TracingDiagnostics, ValidationDiagnostics};
use crate::pool::ValidatorPool;

/// Lazily constructed, resettable holder of one [`ValidatorPool`]
pub struct PoolHandle {
    pool: Mutex<Option<Arc<ValidatorPool>>>,
    diagnostics: Arc<dyn ValidationDiagnostics>,
    handler_factory: Option<HandlerFactory>,
}

impl Default for PoolHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolHandle {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(None),
            diagnostics: Arc::new(TracingDiagnostics),
            handler_factory: None,
        }
    }

    /// Diagnostics sink handed to every pool this handle builds
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn ValidationDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Context handler factory handed to every pool this handle builds
    pub fn with_handler_factory(mut self, factory: HandlerFactory) -> Self {
        self.handler_factory = Some(factory);
        self
    }

    /// Return the pool, building it from `config` on first access.
    ///
    /// `config` is ignored once a pool exists; the first caller's settings win.
    pub fn get(&self, config: Option<PoolConfig>) -> Arc<ValidatorPool> {
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref() {
            if config.is_some() {
                debug!("Pool already built; ignoring supplied configuration");
            }
            return Arc::clone(pool);
        }

        let mut pool = ValidatorPool::new(config.unwrap_or_default())
            .with_diagnostics(Arc::clone(&self.diagnostics));
        if let Some(factory) = &self.handler_factory {
            pool = pool.with_handler_factory(Arc::clone(factory));
        }
        let pool = Arc::new(pool);
        *slot = Some(Arc::clone(&pool));
        pool
    }

    /// The pool, if one has been built
    pub fn current(&self) -> Option<Arc<ValidatorPool>> {
        self.pool.lock().clone()
    }

    /// Tear the pool down and forget it
    pub async fn destroy(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.destroy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_config_wins() {
        let handle = PoolHandle::new();
        assert!(handle.current().is_none());

        let first = handle.get(Some(PoolConfig::new().with_pool_size(2)));
        let second = handle.get(Some(PoolConfig::new().with_pool_size(8)));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().pool_size, 2);
    }

    #[tokio::test]
    async fn test_destroy_clears_pool() {
        let handle = PoolHandle::new();
        let first = handle.get(Some(PoolConfig::new().with_pool_size(1)));

        handle.destroy().await;
        assert!(handle.current().is_none());

        let second = handle.get(None);
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
