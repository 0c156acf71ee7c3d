use std::time::Duration;

use renderer_cache::caching::RendererCache;
use renderer_cache::types::RendererParams;
use renderer_cache_test as test;

pub use test::{StaticConfigStore, TestFactory};

/// The idle timeout used by caches created with [`setup_cache`].
pub const TIMEOUT: Duration = Duration::from_secs(60);

/// Setup tests and create a cache that serves configs for the given tokens.
///
/// Returns clones of the config store and factory handed to the cache, so that tests can
/// inspect them afterwards.
pub fn setup_cache<'a>(
    tokens: impl IntoIterator<Item = &'a str>,
) -> (RendererCache<TestFactory>, StaticConfigStore, TestFactory) {
    setup_cache_with(StaticConfigStore::with_tokens(tokens), TestFactory::new())
}

/// Like [`setup_cache`], with a custom store and factory.
pub fn setup_cache_with(
    store: StaticConfigStore,
    factory: TestFactory,
) -> (RendererCache<TestFactory>, StaticConfigStore, TestFactory) {
    test::setup();
    let cache = test::cache_with_timeout(TIMEOUT, store.clone(), factory.clone());
    (cache, store, factory)
}

/// Parameters for the default `png` variant of `token`.
pub fn params(token: &str) -> RendererParams {
    RendererParams::for_token(token).with_format("png")
}

/// Lets all spawned tasks run until they are blocked.
///
/// Requires a paused clock, so that sleeping only resumes once the runtime is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
