//! Inference engine client.
//!
//! The cache talks to an OpenAI-compatible server (vLLM) through the
//! [`InferenceEngine`] trait:
//!
//! | Call | Request |
//! |------|---------|
//! | [`health`](InferenceEngine::health) | `GET /health` |
//! | [`model_info`](InferenceEngine::model_info) | `GET /v1/models` |
//! | [`prime`](InferenceEngine::prime) | `POST /v1/chat/completions` |
//!
//! Priming sends the context document as the system message with a short,
//! fixed user prompt, `temperature: 0` and a tiny `max_tokens`, so the engine
//! computes (and caches) the KV state for the whole prefix while generating
//! almost nothing.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::assembler::ContextDocument;
use crate::config::EngineConfig;
use crate::error::{DeliveryError, DeliveryResult};

/// Context window assumed when the engine does not report `max_model_len`.
pub const DEFAULT_MAX_MODEL_LEN: usize = 8192;

/// Model served by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub max_model_len: usize,
}

/// Outcome of a successful priming request.
#[derive(Debug, Clone)]
pub struct PrimeReport {
    pub model: String,
    pub prompt_tokens: Option<u64>,
    pub elapsed: Duration,
}

/// A downstream engine that can hold the context document in its prefix cache.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Base URL or other identifier, for logs.
    fn endpoint(&self) -> &str;

    async fn health(&self) -> DeliveryResult<()>;

    async fn model_info(&self) -> DeliveryResult<ModelInfo>;

    async fn prime(&self, document: &ContextDocument) -> DeliveryResult<PrimeReport>;
}

/// Client for vLLM and other OpenAI-compatible servers.
pub struct OpenAiEngine {
    client: reqwest::Client,
    base_url: String,
    config: EngineConfig,
    api_key: Option<String>,
    model: OnceCell<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    max_model_len: Option<usize>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
}

impl OpenAiEngine {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                anyhow::anyhow!("engine.api_key_env names '{}', which is not set", var)
            })?),
            None => None,
        };

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            config: config.clone(),
            api_key,
            model: OnceCell::new(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> DeliveryResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| DeliveryError::from_reqwest(e, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }
        Ok(response)
    }

    async fn discover_model(&self) -> DeliveryResult<ModelInfo> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/v1/models"))
            .await?;
        let list: ModelList = response
            .json()
            .await
            .map_err(|e| DeliveryError::InvalidResponse(e.to_string()))?;

        let entry = match &self.config.model {
            Some(wanted) => list.data.into_iter().find(|m| &m.id == wanted).or_else(|| {
                // a configured model the server does not list is still used as-is
                Some(ModelEntry {
                    id: wanted.clone(),
                    max_model_len: None,
                })
            }),
            None => list.data.into_iter().next(),
        }
        .ok_or(DeliveryError::NoModel)?;

        let info = ModelInfo {
            id: entry.id,
            max_model_len: entry.max_model_len.unwrap_or(DEFAULT_MAX_MODEL_LEN),
        };
        info!(model = %info.id, max_model_len = info.max_model_len, "discovered model");
        Ok(info)
    }
}

#[async_trait]
impl InferenceEngine for OpenAiEngine {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn health(&self) -> DeliveryResult<()> {
        self.send(self.request(reqwest::Method::GET, "/health"))
            .await
            .map(|_| ())
    }

    async fn model_info(&self) -> DeliveryResult<ModelInfo> {
        self.model
            .get_or_try_init(|| self.discover_model())
            .await
            .cloned()
    }

    async fn prime(&self, document: &ContextDocument) -> DeliveryResult<PrimeReport> {
        let model = self.model_info().await?;
        let body = serde_json::json!({
            "model": model.id,
            "messages": [
                { "role": "system", "content": document.text },
                { "role": "user", "content": self.config.priming_prompt },
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": 0,
        });

        let start = Instant::now();
        let response = self
            .send(
                self.request(reqwest::Method::POST, "/v1/chat/completions")
                    .json(&body),
            )
            .await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::InvalidResponse(e.to_string()))?;
        let elapsed = start.elapsed();

        let prompt_tokens = parsed.usage.and_then(|u| u.prompt_tokens);
        debug!(
            model = %model.id,
            bytes = document.len(),
            prompt_tokens,
            elapsed_ms = elapsed.as_millis() as u64,
            "primed context"
        );

        Ok(PrimeReport {
            model: model.id,
            prompt_tokens,
            elapsed,
        })
    }
}

/// Poll [`InferenceEngine::health`] every `interval` until it succeeds.
pub async fn wait_until_healthy(engine: &dyn InferenceEngine, interval: Duration) {
    loop {
        match engine.health().await {
            Ok(()) => {
                info!(endpoint = engine.endpoint(), "inference engine is ready");
                return;
            }
            Err(e) => {
                info!(endpoint = engine.endpoint(), error = %e, "waiting for inference engine");
                tokio::time::sleep(interval).await;
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
