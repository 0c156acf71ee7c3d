use thiserror::Error;

/// An error returned by a [`ConfigStore`](super::ConfigStore) when resolving a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigLoadError {
    /// No configuration is stored under the requested token.
    #[error("map config not found for token {0:?}")]
    NotFound(String),
    /// The configuration could not be read from its backing store.
    #[error("failed to load map config: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConfigLoadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// The reason why a renderer could not be handed out, or stopped working.
///
/// One creation outcome is delivered to every caller waiting for it, so this error is cheap to
/// clone and does not hold on to the underlying error sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendererError {
    /// The request parameters lack a field that is required to identify the renderer.
    #[error("invalid renderer params: {0}")]
    InvalidParams(String),
    /// The map configuration could not be loaded.
    #[error(transparent)]
    ConfigLoad(#[from] ConfigLoadError),
    /// The renderer factory failed to build a renderer.
    #[error("failed to create renderer: {0}")]
    Creation(String),
    /// A renderer that was already in use broke down.
    #[error("renderer failed: {0}")]
    Runtime(String),
    /// The creation of the renderer was abandoned before it produced a result.
    #[error("renderer creation was canceled")]
    Canceled,
}

impl RendererError {
    /// Converts a renderer factory error, logging its full chain of causes.
    #[track_caller]
    pub fn from_creation_error(err: &anyhow::Error) -> Self {
        let dynerr: &dyn std::error::Error = err.as_ref(); // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr, "Failed to create renderer");
        Self::Creation(format!("{err:#}"))
    }

    /// A short, stable name for this kind of error, used to tag metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "invalid_params",
            Self::ConfigLoad(ConfigLoadError::NotFound(_)) => "config_not_found",
            Self::ConfigLoad(ConfigLoadError::Io(_)) => "config_io",
            Self::Creation(_) => "creation",
            Self::Runtime(_) => "runtime",
            Self::Canceled => "canceled",
        }
    }
}
