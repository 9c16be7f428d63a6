//! Binding Engine - owns the shared registry and the set of active bindings
//!
//! One engine per store. Every binding activated through it shares a single
//! [`SubscriptionRegistry`], so two bindings watching the same field cost
//! one store subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::error::{BindError, Result};
use crate::eval::{BindingProgram, BoundValue};
use crate::event::{EventEmitter, NoopEmitter};
use crate::registry::SubscriptionRegistry;
use crate::resolve::PathResolver;
use crate::store::{EntityId, RetryingStore, StoreAdapter};

use super::runtime::{BindingHandle, RuntimeParts, ValueCallback};
use super::spec::BindingSpec;

pub struct BindingEngine {
    registry: Arc<SubscriptionRegistry>,
    resolver: PathResolver,
    emitter: Arc<dyn EventEmitter>,
    config: EngineConfig,
    runtime: Handle,
    bindings: DashMap<Arc<str>, BindingHandle>,
    next_id: AtomicU64,
}

impl BindingEngine {
    /// Create an engine over `store`; must be called inside a tokio runtime
    pub fn init(store: Arc<dyn StoreAdapter>, config: EngineConfig) -> Result<Self> {
        Self::init_with_emitter(store, config, Arc::new(NoopEmitter))
    }

    /// Like [`init`](Self::init), reporting activity to `emitter`
    pub fn init_with_emitter(
        store: Arc<dyn StoreAdapter>,
        config: EngineConfig,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| BindError::NoRuntime {
            reason: e.to_string(),
        })?;

        let registry = SubscriptionRegistry::new(Arc::clone(&store), Arc::clone(&emitter));
        let resolver = PathResolver::new(store, config.max_hops);
        debug!(max_hops = config.max_hops, "binding engine ready");

        Ok(Self {
            registry,
            resolver,
            emitter,
            config,
            runtime,
            bindings: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Wrap `store` in a [`RetryingStore`] built from `config.retry`
    ///
    /// Reads and subscribes that fail with `StoreUnavailable` are retried with
    /// backoff before the engine sees them.
    pub fn with_retrying_store<S>(
        store: S,
        config: EngineConfig,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<Self>
    where
        S: StoreAdapter + 'static,
    {
        let retrying = RetryingStore::new(store, (&config.retry).into());
        Self::init_with_emitter(Arc::new(retrying), config, emitter)
    }

    /// Compile `spec` and bind it against `root`
    ///
    /// Parse and depth errors surface here and nothing is subscribed.
    /// Returns once every dependency has its initial value; the first
    /// `on_change` call follows asynchronously.
    #[instrument(level = "debug", skip(self, spec, root, on_change), fields(binding = %spec.key()))]
    pub async fn activate<F>(
        &self,
        spec: BindingSpec,
        root: impl Into<EntityId>,
        on_change: F,
    ) -> Result<BindingHandle>
    where
        F: Fn(BoundValue) + Send + Sync + 'static,
    {
        if self.registry.is_shut_down() {
            return Err(BindError::RegistryShutDown);
        }

        let program = BindingProgram::compile(&spec)?;
        for path in program.dependencies() {
            self.resolver.check_depth(path)?;
        }

        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id: Arc<str> = Arc::from(format!("{}:{}", n, spec.key()));
        let on_change: ValueCallback = Arc::new(on_change);

        let handle = BindingHandle::start(RuntimeParts {
            id: Arc::clone(&id),
            spec,
            program,
            root: root.into(),
            registry: Arc::clone(&self.registry),
            resolver: self.resolver.clone(),
            emitter: Arc::clone(&self.emitter),
            runtime: self.runtime.clone(),
            on_change,
        })
        .await;

        self.bindings.insert(id, handle.clone());
        Ok(handle)
    }

    /// Deactivate and forget `handle`; idempotent
    pub async fn deactivate(&self, handle: &BindingHandle) {
        self.bindings.remove(handle.id());
        handle.deactivate().await;
    }

    pub fn active_bindings(&self) -> Vec<BindingHandle> {
        self.bindings
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Deactivate every binding, then close any remaining subscription
    pub async fn shutdown(&self) {
        let handles = self.active_bindings();
        let count = handles.len();
        for handle in handles {
            self.deactivate(&handle).await;
        }
        self.registry.shutdown().await;
        info!(bindings = count, "binding engine shut down");
    }
}

impl std::fmt::Debug for BindingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingEngine")
            .field("bindings", &self.bindings.len())
            .field("max_hops", &self.config.max_hops)
            .finish()
    }
}
