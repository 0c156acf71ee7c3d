//! Helpers for testing the renderer cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - [`StaticConfigStore`] and [`TestFactory`] are cheap to clone, and all clones share their
//!    state. Keep a clone around to inspect how often configs were loaded or renderers were
//!    created after handing the original to the cache.
//!
//!  - Renderers created by a [`TestFactory`] can be controlled through their
//!    [`RendererHandle`], for instance to make them fail or to check whether they were closed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use renderer_cache::caching::{
    ConfigLoadError, ConfigStore, Renderer, RendererCache, RendererError, RendererFactory,
};
use renderer_cache::config::CacheConfig;
use renderer_cache::types::RendererParams;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `renderer_cache` crate and mutes
///    all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("renderer_cache=trace"))
        .with_target(false)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a cache with the given idle timeout on the current runtime.
pub fn cache_with_timeout(
    timeout: Duration,
    store: StaticConfigStore,
    factory: TestFactory,
) -> RendererCache<TestFactory> {
    let config = CacheConfig { timeout };
    RendererCache::new(config, store, factory, tokio::runtime::Handle::current())
}

/// The map configuration served by a [`StaticConfigStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapConfig {
    pub token: String,
}

/// A config store backed by an in-memory map of tokens.
///
/// Unknown tokens fail with [`ConfigLoadError::NotFound`].
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    configs: Arc<Mutex<HashMap<String, Result<MapConfig, ConfigLoadError>>>>,
    loads: Arc<AtomicUsize>,
    latency: Duration,
}

impl StaticConfigStore {
    /// Creates a store serving a config for each of the given tokens.
    pub fn with_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let store = Self::default();
        for token in tokens {
            store.insert(token);
        }
        store
    }

    /// Delays every load by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert(&self, token: &str) {
        let config = MapConfig {
            token: token.to_owned(),
        };
        self.configs
            .lock()
            .unwrap()
            .insert(token.to_owned(), Ok(config));
    }

    /// Makes every load of `token` fail with `error`.
    pub fn fail(&self, token: &str, error: ConfigLoadError) {
        self.configs
            .lock()
            .unwrap()
            .insert(token.to_owned(), Err(error));
    }

    /// The number of loads so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ConfigStore for StaticConfigStore {
    type Config = MapConfig;

    fn load<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<MapConfig, ConfigLoadError>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let configs = self.configs.lock().unwrap();
            match configs.get(token) {
                Some(result) => result.clone(),
                None => Err(ConfigLoadError::NotFound(token.to_owned())),
            }
        })
    }
}

/// Controls a [`TestRenderer`] from within a test.
#[derive(Debug)]
pub struct RendererHandle {
    id: usize,
    closes: AtomicUsize,
    fail: Mutex<Option<oneshot::Sender<RendererError>>>,
}

impl RendererHandle {
    /// How often the renderer was closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Makes the renderer report a runtime failure.
    pub fn trigger_failure(&self, message: &str) {
        if let Some(sender) = self.fail.lock().unwrap().take() {
            sender.send(RendererError::Runtime(message.into())).ok();
        }
    }
}

/// A renderer created by [`TestFactory`].
#[derive(Debug)]
pub struct TestRenderer {
    pub id: usize,
    pub token: String,
    /// The context passed to the factory when creating this renderer.
    pub context: Option<String>,
    handle: Arc<RendererHandle>,
    failure: Mutex<Option<oneshot::Receiver<RendererError>>>,
}

impl TestRenderer {
    pub fn handle(&self) -> &Arc<RendererHandle> {
        &self.handle
    }
}

impl Renderer for TestRenderer {
    fn close(&self) {
        self.handle.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn failure(&self) -> Option<BoxFuture<'static, RendererError>> {
        let receiver = self.failure.lock().unwrap().take()?;
        let failure = async move {
            match receiver.await {
                Ok(err) => err,
                // the handle is gone, so the renderer can never fail
                Err(_) => future::pending().await,
            }
        };
        Some(failure.boxed())
    }
}

/// A renderer factory that counts creations, and can be told to fail or to take its time.
#[derive(Debug, Clone, Default)]
pub struct TestFactory {
    renderers: Arc<Mutex<Vec<Arc<RendererHandle>>>>,
    creations: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<String>>>,
    latency: Duration,
}

impl TestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every creation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes all creations for `token` fail.
    pub fn fail_token(&self, token: &str) {
        self.failing.lock().unwrap().insert(token.to_owned());
    }

    pub fn heal_token(&self, token: &str) {
        self.failing.lock().unwrap().remove(token);
    }

    /// The number of creations started so far, including failed ones.
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    /// The handle of the renderer with the given `id`, in order of creation.
    pub fn renderer(&self, id: usize) -> Arc<RendererHandle> {
        Arc::clone(&self.renderers.lock().unwrap()[id])
    }

    /// The number of successfully created renderers.
    pub fn renderer_count(&self) -> usize {
        self.renderers.lock().unwrap().len()
    }
}

impl RendererFactory for TestFactory {
    type Config = MapConfig;
    type Context = String;
    type Renderer = TestRenderer;

    fn create<'a>(
        &'a self,
        config: MapConfig,
        _params: &'a RendererParams,
        context: Option<&'a String>,
    ) -> BoxFuture<'a, anyhow::Result<TestRenderer>> {
        Box::pin(async move {
            self.creations.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            if self.failing.lock().unwrap().contains(&config.token) {
                anyhow::bail!("renderer for {} is broken", config.token);
            }

            let (sender, receiver) = oneshot::channel();
            let mut renderers = self.renderers.lock().unwrap();
            let handle = Arc::new(RendererHandle {
                id: renderers.len(),
                closes: AtomicUsize::new(0),
                fail: Mutex::new(Some(sender)),
            });
            renderers.push(Arc::clone(&handle));

            Ok(TestRenderer {
                id: handle.id,
                token: config.token,
                context: context.cloned(),
                handle,
                failure: Mutex::new(Some(receiver)),
            })
        })
    }
}
