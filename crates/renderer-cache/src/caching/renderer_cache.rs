use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::entry::{CacheEntry, CreationGuard, Outcome, RendererRef};
use super::{
    CacheBuster, CacheKey, ConfigStore, DefaultKeys, KeyDerivation, Renderer, RendererError,
    RendererFactory,
};
use crate::config::CacheConfig;
use crate::types::RendererParams;

/// The sweep never runs more often than this, even with a smaller idle timeout.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

type Entry<F> = Arc<CacheEntry<<F as RendererFactory>::Renderer>>;

/// A cache of renderers keyed by their request parameters.
///
/// Concurrent requests for the same key share a single creation, and renderers that were not
/// used for longer than the configured timeout are evicted by a periodic sweep. Renderers are
/// handed out as [`RendererRef`]s, and are only closed once the cache and every reference let
/// go of them.
///
/// The sweep runs on the given runtime until the cache is [shut down](Self::shutdown) or
/// dropped.
pub struct RendererCache<F: RendererFactory> {
    inner: Arc<Inner<F>>,
    sweeper: JoinHandle<()>,
}

struct Inner<F: RendererFactory> {
    config: CacheConfig,
    entries: Mutex<HashMap<CacheKey, Entry<F>>>,
    store: Box<dyn ConfigStore<Config = F::Config>>,
    factory: F,
    keys: Box<dyn KeyDerivation>,
    runtime: Handle,
}

impl<F: RendererFactory> fmt::Debug for RendererCache<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererCache")
            .field("config", &self.inner.config)
            .field("entries", &self.len())
            .finish()
    }
}

impl<F: RendererFactory> RendererCache<F> {
    /// Creates a cache using the [`DefaultKeys`] layout.
    pub fn new<S>(config: CacheConfig, store: S, factory: F, runtime: Handle) -> Self
    where
        S: ConfigStore<Config = F::Config>,
    {
        Self::with_keys(config, store, factory, DefaultKeys, runtime)
    }

    /// Creates a cache with a custom key derivation.
    pub fn with_keys<S, K>(
        config: CacheConfig,
        store: S,
        factory: F,
        keys: K,
        runtime: Handle,
    ) -> Self
    where
        S: ConfigStore<Config = F::Config>,
        K: KeyDerivation,
    {
        let inner = Arc::new(Inner {
            config,
            entries: Mutex::new(HashMap::new()),
            store: Box::new(store),
            factory,
            keys: Box::new(keys),
            runtime: runtime.clone(),
        });

        let period = config.timeout.max(MIN_SWEEP_INTERVAL);
        let sweeper = runtime.spawn(
            sweep_periodically(Arc::downgrade(&inner), period)
                .bind_hub(Hub::new_from_top(Hub::current())),
        );

        Self { inner, sweeper }
    }

    /// Returns a renderer for the given parameters.
    ///
    /// A cached renderer is reused unless the request carries a newer cache-buster. Otherwise a
    /// new renderer is created, and concurrent requests for the same key wait for that one
    /// creation to finish.
    pub async fn get_renderer(
        &self,
        params: RendererParams,
    ) -> Result<RendererRef<F::Renderer>, RendererError> {
        self.get_renderer_with_context(params, None).await
    }

    /// Like [`get_renderer`](Self::get_renderer), passing `context` to the factory in case this
    /// request triggers a creation.
    pub async fn get_renderer_with_context(
        &self,
        params: RendererParams,
        context: Option<F::Context>,
    ) -> Result<RendererRef<F::Renderer>, RendererError> {
        let receiver = self.inner.enqueue(params, context);
        receiver.await.unwrap_or(Err(RendererError::Canceled))
    }

    /// Evicts all variants of the logical resource identified by `params`.
    pub fn reset(&self, params: &RendererParams) {
        let base_key = self.inner.keys.base_key(params);
        tracing::debug!(base_key = %base_key, "Resetting renderers");
        self.inner
            .evict_where(|key, _| key.has_base(&base_key), "reset");
    }

    /// Evicts every entry.
    pub fn purge(&self) {
        tracing::debug!("Purging renderer cache");
        self.inner.evict_where(|_, _| true, "purge");
    }

    /// Removes the entry at `key` and releases the cache's reference to it.
    ///
    /// Renderers still in use are closed once their last reference is dropped. Deleting a
    /// key that is not cached does nothing.
    pub fn del(&self, key: &str) {
        let removed = self.inner.entries.lock().remove(key);
        if let Some(entry) = removed {
            release_evicted(entry, "delete");
        }
    }

    /// Evicts all entries that have not been accessed for longer than the configured timeout.
    ///
    /// This runs periodically in the background, but can also be triggered manually.
    pub fn sweep(&self) {
        self.inner.sweep();
    }

    /// Stops the periodic sweep.
    ///
    /// Cached renderers stay available, but are no longer evicted when idle.
    pub fn shutdown(&self) {
        self.sweeper.abort();
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The number of cached entries, including ones still being created.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    /// Derives the cache key for `params`.
    pub fn key(&self, params: &RendererParams) -> CacheKey {
        self.inner.keys.key(params)
    }
}

impl<F: RendererFactory> Drop for RendererCache<F> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

impl<F: RendererFactory> Inner<F> {
    /// Looks up or creates the entry for `params`, and registers a waiter on it.
    ///
    /// Lookup, insertion and registration happen under one lock, so that two requests for the
    /// same key can never both start a creation.
    fn enqueue(
        self: &Arc<Self>,
        params: RendererParams,
        context: Option<F::Context>,
    ) -> oneshot::Receiver<Outcome<F::Renderer>> {
        metric!(counter("renderer_cache.access") += 1);

        let cache_buster = CacheBuster::from_param(params.cache_buster.as_ref(), now_millis());
        let key = self.keys.key(&params);

        let mut entries = self.entries.lock();
        let cached = entries
            .get(&key)
            .filter(|entry| !cache_buster.supersedes(entry.cache_buster()))
            .cloned();

        let (entry, replaced) = match cached {
            Some(entry) => {
                metric!(counter("renderer_cache.hit") += 1);
                tracing::trace!(
                    key = %key,
                    pending = entry.is_pending(),
                    "Reusing cached renderer"
                );
                (entry, None)
            }
            None => {
                tracing::debug!(key = %key, cache_buster = %cache_buster, "Creating renderer");
                let entry = Arc::new(CacheEntry::new(key.clone(), cache_buster));
                entry.acquire();
                let replaced = entries.insert(key, Arc::clone(&entry));
                self.spawn_creation(Arc::clone(&entry), params, context);
                (entry, replaced)
            }
        };

        let receiver = entry.enqueue_waiter();
        drop(entries);

        // The replaced entry is no longer reachable through the map, but its waiters and
        // references keep it alive as long as they need it.
        if let Some(replaced) = replaced {
            release_evicted(replaced, "replaced");
        }

        receiver
    }

    fn spawn_creation(
        self: &Arc<Self>,
        entry: Entry<F>,
        params: RendererParams,
        context: Option<F::Context>,
    ) {
        let guard = CreationGuard::new(Arc::clone(&entry));
        let future = Arc::clone(self).create(guard, entry, params, context);
        self.runtime
            .spawn(future.bind_hub(Hub::new_from_top(Hub::current())));
    }

    /// Loads the map config and builds the renderer, resolving `entry` with the outcome.
    async fn create(
        self: Arc<Self>,
        guard: CreationGuard<F::Renderer>,
        entry: Entry<F>,
        params: RendererParams,
        context: Option<F::Context>,
    ) {
        let config = match self.load_config(&params).await {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(key = %entry.key(), error = %err, "Failed to load map config");
                metric!(counter("renderer_cache.creation.failed") += 1, "reason" => err.kind());
                // The next request for this key should try again, instead of seeing this error.
                self.remove_entry(&entry, "config");
                guard.resolve(Err(err));
                return;
            }
        };

        metric!(counter("renderer_cache.creation") += 1);
        let start = Instant::now();
        let result = self
            .factory
            .create(config, &params, context.as_ref())
            .await;
        metric!(timer("renderer_cache.creation.duration") = start.elapsed());

        match result {
            Ok(renderer) => {
                let failure = renderer.failure();
                guard.resolve(Ok(renderer));
                if let Some(failure) = failure {
                    self.watch_failure(&entry, failure);
                }
            }
            Err(err) => {
                let err = RendererError::from_creation_error(&err);
                metric!(counter("renderer_cache.creation.failed") += 1, "reason" => err.kind());
                guard.resolve(Err(err));
            }
        }
    }

    async fn load_config(&self, params: &RendererParams) -> Result<F::Config, RendererError> {
        let token = params
            .token
            .as_deref()
            .ok_or_else(|| RendererError::InvalidParams("missing token".into()))?;
        Ok(self.store.load(token).await?)
    }

    /// Evicts `entry` once `failure` completes, unless it was closed before.
    fn watch_failure(
        self: &Arc<Self>,
        entry: &Entry<F>,
        failure: BoxFuture<'static, RendererError>,
    ) {
        let inner = Arc::downgrade(self);
        let weak_entry = Arc::downgrade(entry);
        let listener = async move {
            let err = failure.await;
            let (Some(inner), Some(entry)) = (inner.upgrade(), weak_entry.upgrade()) else {
                return;
            };
            tracing::warn!(key = %entry.key(), error = %err, "Renderer failed, evicting it");
            inner.remove_entry(&entry, "failure");
        };
        let task = self
            .runtime
            .spawn(listener.bind_hub(Hub::new_from_top(Hub::current())));
        entry.set_failure_listener(task.abort_handle());
    }

    /// Removes `entry` from the map if it still occupies its key.
    fn remove_entry(&self, entry: &Entry<F>, reason: &str) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(entry.key()) {
                Some(current) if Arc::ptr_eq(current, entry) => entries.remove(entry.key()),
                _ => None,
            }
        };
        match removed {
            Some(removed) => {
                release_evicted(removed, reason);
                true
            }
            None => false,
        }
    }

    fn evict_where<P>(&self, mut predicate: P, reason: &str)
    where
        P: FnMut(&CacheKey, &Entry<F>) -> bool,
    {
        let evicted: Vec<_> = {
            let mut entries = self.entries.lock();
            let keys: Vec<_> = entries
                .iter()
                .filter(|&(key, entry)| predicate(key, entry))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };

        for entry in evicted {
            release_evicted(entry, reason);
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        let timeout = self.config.timeout;
        self.evict_where(
            |_, entry| entry.time_since_last_access(now) > timeout,
            "idle",
        );

        let remaining = self.entries.lock().len();
        metric!(gauge("renderer_cache.entries") = remaining as u64);
    }
}

async fn sweep_periodically<F: RendererFactory>(inner: Weak<Inner<F>>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(cache) = inner.upgrade() else {
            break;
        };
        cache.sweep();
    }
}

fn release_evicted<R: Renderer>(entry: Arc<CacheEntry<R>>, reason: &str) {
    tracing::debug!(key = %entry.key(), reason, "Evicting renderer");
    metric!(counter("renderer_cache.evicted") += 1, "reason" => reason);
    entry.release();
}

fn now_millis() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}
