use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use renderer_cache::caching::{
    ConfigLoadError, ConfigStore, Renderer, RendererCache, RendererError, RendererFactory,
};
use renderer_cache::types::RendererParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The number of distinct tokens requested.
    pub tokens: usize,
    /// The number of render variants requested per token.
    #[serde(default = "default_variants")]
    pub variants: usize,
    /// How long it takes to create one renderer.
    #[serde(default, with = "humantime_serde")]
    pub creation_latency: Duration,
}

fn default_variants() -> usize {
    1
}

/// Cycles through all token and variant combinations of one workload.
pub struct Payload {
    workload: usize,
    tokens: usize,
    variants: usize,
    creation_latency: Duration,
    requests: AtomicUsize,
}

impl Payload {
    fn params(&self, request: usize) -> RendererParams {
        let token = format!("workload{}-token{}", self.workload, request % self.tokens);
        let variant = (request / self.tokens) % self.variants;
        RendererParams::for_token(token)
            .with_format("png")
            .with_scale_factor((variant + 1) as f64)
    }

    fn next_params(&self) -> RendererParams {
        let request = self.requests.fetch_add(1, Ordering::Relaxed);
        self.params(request)
    }

    /// The number of distinct renderers this workload uses.
    pub fn combinations(&self) -> usize {
        self.tokens * self.variants
    }
}

pub fn prepare_payload(index: usize, workload: &Workload) -> Payload {
    Payload {
        workload: index,
        tokens: workload.tokens.max(1),
        variants: workload.variants.max(1),
        creation_latency: workload.creation_latency,
        requests: AtomicUsize::new(0),
    }
}

/// Requests the renderer for every combination of the workload once.
pub async fn warmup_payload(cache: &RendererCache<SimulatedFactory>, payload: &Payload) {
    let requests = (0..payload.combinations()).map(|request| {
        cache.get_renderer_with_context(payload.params(request), Some(payload.creation_latency))
    });
    for result in futures::future::join_all(requests).await {
        if let Err(err) = result {
            tracing::error!(error = %err, "Warmup request failed");
        }
    }
}

pub async fn process_payload(
    cache: &RendererCache<SimulatedFactory>,
    payload: &Payload,
) -> Result<(), RendererError> {
    let renderer = cache
        .get_renderer_with_context(payload.next_params(), Some(payload.creation_latency))
        .await?;
    std::hint::black_box(&renderer.token);
    Ok(())
}

/// Serves a config for every token.
#[derive(Debug, Default)]
pub struct SimulatedStore;

impl ConfigStore for SimulatedStore {
    type Config = String;

    fn load<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<String, ConfigLoadError>> {
        Box::pin(async move { Ok(token.to_owned()) })
    }
}

/// Creates renderers, taking as long as the requesting workload specifies.
#[derive(Debug, Default)]
pub struct SimulatedFactory;

#[derive(Debug)]
pub struct SimulatedRenderer {
    token: String,
}

impl Renderer for SimulatedRenderer {}

impl RendererFactory for SimulatedFactory {
    type Config = String;
    type Context = Duration;
    type Renderer = SimulatedRenderer;

    fn create<'a>(
        &'a self,
        config: String,
        _params: &'a RendererParams,
        context: Option<&'a Duration>,
    ) -> BoxFuture<'a, anyhow::Result<SimulatedRenderer>> {
        Box::pin(async move {
            let latency = context.copied().unwrap_or_default();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Ok(SimulatedRenderer { token: config })
        })
    }
}
