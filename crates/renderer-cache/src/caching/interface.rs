use futures::future::BoxFuture;

use super::{ConfigLoadError, RendererError};
use crate::types::RendererParams;

/// Resolves a token into the map configuration a renderer is built from.
pub trait ConfigStore: Send + Sync + 'static {
    type Config: Send + 'static;

    /// Loads the configuration stored under `token`.
    fn load<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Self::Config, ConfigLoadError>>;
}

/// Builds renderers from a map configuration.
///
/// Creation can be arbitrarily slow. The [`RendererCache`](super::RendererCache) makes sure that
/// only one renderer is being created per cache key at any time.
pub trait RendererFactory: Send + Sync + 'static {
    /// The configuration type, as loaded by the [`ConfigStore`].
    type Config: Send + 'static;
    /// Additional per-request information that influences creation, like render limits.
    type Context: Send + Sync + 'static;
    /// The renderer being built.
    type Renderer: Renderer;

    /// Creates a renderer.
    ///
    /// The `context` is the one of the request that triggered the creation. Requests that join
    /// an in-flight creation share its result regardless of their own context.
    fn create<'a>(
        &'a self,
        config: Self::Config,
        params: &'a RendererParams,
        context: Option<&'a Self::Context>,
    ) -> BoxFuture<'a, anyhow::Result<Self::Renderer>>;
}

/// A renderer that can be shared by all requests for the same cache key.
pub trait Renderer: Send + Sync + 'static {
    /// Releases all resources held by the renderer, such as connection pools.
    ///
    /// This is called exactly once, after the last reference to the renderer was released.
    /// Asynchronous cleanup has to be spawned by the implementation.
    fn close(&self) {}

    /// Returns a future that completes once the renderer has broken down and can no longer
    /// be used.
    ///
    /// The cache evicts the renderer when the future completes, so that the next request
    /// creates a fresh one. It is polled from the time the renderer is ready until it is closed.
    fn failure(&self) -> Option<BoxFuture<'static, RendererError>> {
        None
    }
}
