//! A reference counted cache of map renderers.
//!
//! Renderers are expensive to build, so the [`RendererCache`](caching::RendererCache) shares
//! one renderer between all requests with the same parameters, and closes it once it was not
//! used for a while.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod types;
