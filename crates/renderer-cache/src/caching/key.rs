use std::borrow::Borrow;
use std::fmt::{self, Write};
use std::sync::Arc;

use crate::types::RendererParams;

/// The key under which a renderer is stored in the [`RendererCache`](super::RendererCache).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key belongs to the logical resource identified by `base`.
    pub fn has_base(&self, base: &CacheKey) -> bool {
        self.0.starts_with(base.as_str())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.into())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key.into())
    }
}

/// Derives cache keys from request parameters.
///
/// Implementations must be deterministic, and every key derived from some parameters must start
/// with the base key derived from the same parameters.
pub trait KeyDerivation: Send + Sync + 'static {
    /// The key identifying one particular renderer variant.
    fn key(&self, params: &RendererParams) -> CacheKey;

    /// The key prefix shared by all variants of the same logical resource.
    fn base_key(&self, params: &RendererParams) -> CacheKey;
}

/// The default key layout: `dbname:token:dbuser:format:layer:scale_factor`.
///
/// The base key consists of the first three segments including the trailing separator, so that
/// one token is never treated as a prefix of another.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeys;

impl DefaultKeys {
    fn write_base(buf: &mut String, params: &RendererParams) -> fmt::Result {
        let segment = |value: &Option<String>| value.as_deref().unwrap_or_default().to_owned();
        write!(
            buf,
            "{}:{}:{}:",
            segment(&params.dbname),
            segment(&params.token),
            segment(&params.dbuser)
        )
    }
}

impl KeyDerivation for DefaultKeys {
    fn key(&self, params: &RendererParams) -> CacheKey {
        let mut key = String::new();
        // writing into a `String` can not fail
        Self::write_base(&mut key, params).ok();
        write!(
            key,
            "{}:{}:{}",
            params.format.as_deref().unwrap_or_default(),
            params.layer.as_deref().unwrap_or_default(),
            params.scale_factor.unwrap_or(1.0)
        )
        .ok();
        key.into()
    }

    fn base_key(&self, params: &RendererParams) -> CacheKey {
        let mut key = String::new();
        Self::write_base(&mut key, params).ok();
        key.into()
    }
}
