//! Request parameters accepted by the renderer cache.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A caller-supplied cache-buster, as it arrives in a request.
///
/// Requests can carry either a numeric or a textual cache-buster, and both are preserved as-is
/// until they are turned into a [`CacheBuster`](crate::caching::CacheBuster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheBusterParam {
    Number(f64),
    Text(String),
}

impl From<f64> for CacheBusterParam {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for CacheBusterParam {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for CacheBusterParam {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for CacheBusterParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for CacheBusterParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Parameters identifying the renderer a request wants to use.
///
/// `token`, `dbname` and `dbuser` identify one logical map configuration, while `format`,
/// `layer` and `scale_factor` select a rendering variant of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RendererParams {
    /// The token under which the map configuration is stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbuser: Option<String>,
    /// Output format, such as `png` or `mvt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// A layer filter, such as `all` or `0,2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    /// Version marker that forces a new renderer when it advances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_buster: Option<CacheBusterParam>,
    /// Additional parameters that are handed through to the renderer factory.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RendererParams {
    /// Creates parameters for the given token, with every other field unset.
    pub fn for_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = Some(scale_factor);
        self
    }

    pub fn with_cache_buster(mut self, cache_buster: impl Into<CacheBusterParam>) -> Self {
        self.cache_buster = Some(cache_buster.into());
        self
    }
}
