use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use research_types::{
    Artifact, Citation, ErrorClass, ModeFamily, ModelInfo, TokenPricing, TokenUsage, ToolKind,
};
use serde_json::{json, Value};
use tokio::sync::RwLock;

mod adapters;
mod registry;

pub use adapters::{AnthropicAdapter, AzureAdapter, GeminiAdapter, GrokAdapter, OpenAiAdapter};
pub use registry::ProviderRegistry;

#[derive(Debug, Clone)]
pub struct AdapterError {
    pub status: Option<u16>,
    pub timed_out: bool,
    pub message: String,
    pub raw: Value,
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn classify(&self) -> ErrorClass {
        if self.timed_out {
            return ErrorClass::Transient;
        }
        match self.status {
            Some(401) | Some(403) => ErrorClass::Auth,
            Some(400) | Some(404) | Some(422) => ErrorClass::InvalidRequest,
            Some(429) => ErrorClass::RateLimit,
            Some(s) if s >= 500 => ErrorClass::ProviderDown,
            _ => ErrorClass::Transient,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub client_token: String,
    pub prompt: String,
    pub model: String,
    pub tools: Vec<ToolKind>,
}

#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub external_id: Option<String>,
    pub initial_status: ProviderStatus,
    pub synchronous_result: Option<Artifact>,
}

/// The per-provider contract (C5). Adapters never retry internally; the
/// Router and Queue own retry/fallback policy. Submit must be idempotent
/// per `client_token`; fetch must be deterministic after SUCCEEDED.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn provider_id(&self) -> &str;
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResult, AdapterError>;
    async fn status(&self, external_id: &str) -> Result<ProviderStatus, AdapterError>;
    async fn fetch(&self, external_id: &str) -> Result<Artifact, AdapterError>;
    async fn cancel(&self, external_id: &str) -> bool;
}

/// Wraps any `Adapter` with client-token idempotency: a repeated submit
/// within the window returns the cached result instead of re-submitting.
pub struct IdempotentAdapter<A: Adapter> {
    inner: A,
    cache: RwLock<HashMap<String, (DateTime<Utc>, SubmitResultCache)>>,
}

#[derive(Clone)]
struct SubmitResultCache {
    external_id: Option<String>,
    initial_status: ProviderStatus,
}

const IDEMPOTENCY_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

impl<A: Adapter> IdempotentAdapter<A> {
    pub fn new(inner: A) -> Self {
        IdempotentAdapter {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<A: Adapter> Adapter for IdempotentAdapter<A> {
    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
        let now = Utc::now();
        {
            let cache = self.cache.read().await;
            if let Some((at, cached)) = cache.get(&request.client_token) {
                if now - *at <= IDEMPOTENCY_WINDOW {
                    return Ok(SubmitResult {
                        external_id: cached.external_id.clone(),
                        initial_status: cached.initial_status,
                        synchronous_result: None,
                    });
                }
            }
        }
        let result = self.inner.submit(request).await?;
        self.cache.write().await.insert(
            request.client_token.clone(),
            (
                now,
                SubmitResultCache {
                    external_id: result.external_id.clone(),
                    initial_status: result.initial_status,
                },
            ),
        );
        Ok(result)
    }

    async fn status(&self, external_id: &str) -> Result<ProviderStatus, AdapterError> {
        self.inner.status(external_id).await
    }

    async fn fetch(&self, external_id: &str) -> Result<Artifact, AdapterError> {
        self.inner.fetch(external_id).await
    }

    async fn cancel(&self, external_id: &str) -> bool {
        self.inner.cancel(external_id).await
    }
}

pub fn default_pricing(input: f64, output: f64, reasoning: f64) -> TokenPricing {
    TokenPricing {
        input_per_million: input,
        output_per_million: output,
        reasoning_per_million: reasoning,
    }
}

pub fn artifact_from_text(
    job_id: uuid::Uuid,
    text: String,
    citations: Vec<Citation>,
    usage: TokenUsage,
    raw: Value,
) -> Artifact {
    Artifact {
        job_id,
        markdown_body: text,
        citations,
        token_usage: usage,
        provider_raw: raw,
        created_at: Utc::now(),
    }
}

pub fn placeholder_model(
    provider_id: &str,
    id: &str,
    display_name: &str,
    context_window: usize,
    pricing: TokenPricing,
    mode_family: ModeFamily,
    tier: u8,
) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        provider_id: provider_id.to_string(),
        display_name: display_name.to_string(),
        context_window,
        pricing,
        supported_tools: vec![ToolKind::WebSearch, ToolKind::FileSearch],
        mode_family,
        typical_latency_ms: match mode_family {
            ModeFamily::Synchronous => 2_000,
            ModeFamily::AsynchronousJob => 120_000,
        },
        timeout: Duration::from_secs(match mode_family {
            ModeFamily::Synchronous => 60,
            ModeFamily::AsynchronousJob => 7_200,
        }),
        tier,
    }
}

pub fn is_placeholder_api_key(key: &str) -> bool {
    key.is_empty() || key.starts_with("sk-placeholder") || key == "REPLACE_ME"
}

pub fn extract_text_from_json(body: &Value, pointers: &[&str]) -> Option<String> {
    for pointer in pointers {
        if let Some(text) = body.pointer(pointer).and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }
    None
}

pub fn truncate_for_error(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        format!("{}...", &text[..max_len])
    }
}

pub fn empty_raw() -> Value {
    json!({})
}
