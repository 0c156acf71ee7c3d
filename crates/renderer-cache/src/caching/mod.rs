//! The shared renderer cache.
//!
//! # Entries
//!
//! Each [`CacheKey`] maps to one entry, which is either still being created, holds a ready
//! renderer, or holds the error its creation failed with. Requests that find a pending entry
//! queue up behind it and are notified in order once the creation finishes. A failed entry keeps
//! its error until it is evicted, so every later request for that key sees the same error.
//!
//! # References
//!
//! Every entry counts its references. The cache holds one as long as the entry is in the map,
//! and every [`RendererRef`] handed out to a caller holds another one. The renderer is closed
//! exactly once, when the last of these is released. Evicting an entry thus never closes a
//! renderer that is still in use.
//!
//! # Cache busters
//!
//! Requests can carry a [`CacheBuster`]. A request whose cache-buster supersedes the one of the
//! cached entry replaces that entry with a freshly created one. See
//! [`CacheBuster::supersedes`] for the exact rules.
//!
//! # Eviction
//!
//! Entries are evicted:
//! - when they were not accessed for longer than the configured timeout,
//! - by [`RendererCache::reset`], [`RendererCache::purge`] and [`RendererCache::del`],
//! - when their renderer reports a [failure](Renderer::failure),
//! - when the map config for their token could not be loaded.

mod buster;
mod entry;
mod error;
mod interface;
mod key;
mod renderer_cache;

pub use buster::CacheBuster;
pub use entry::{Outcome, RendererRef};
pub use error::{ConfigLoadError, RendererError};
pub use interface::{ConfigStore, Renderer, RendererFactory};
pub use key::{CacheKey, DefaultKeys, KeyDerivation};
pub use renderer_cache::RendererCache;
