use async_trait::async_trait;
use reqwest::Client;
use research_types::TokenUsage;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    artifact_from_text, empty_raw, extract_text_from_json, truncate_for_error, Adapter,
    AdapterError, ProviderStatus, SubmitRequest, SubmitResult,
};

fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

async fn request_error(resp: reqwest::Response) -> AdapterError {
    let status = resp.status().as_u16();
    let body: Value = resp
        .json()
        .await
        .unwrap_or_else(|_| json!({ "error": "unparseable response body" }));
    let message = extract_text_from_json(&body, &["/error/message", "/message"])
        .unwrap_or_else(|| "provider request failed".to_string());
    AdapterError {
        status: Some(status),
        timed_out: false,
        message: truncate_for_error(&message, 500),
        raw: body,
    }
}

fn timeout_error(err: &reqwest::Error) -> AdapterError {
    AdapterError {
        status: None,
        timed_out: err.is_timeout(),
        message: truncate_for_error(&err.to_string(), 500),
        raw: empty_raw(),
    }
}

/// OpenAI. Chat-completion models answer synchronously; the background
/// Responses API (`o3-deep-research`) returns an id to poll.
pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        OpenAiAdapter {
            client: Client::new(),
            api_key,
            base_url: normalize_base(&base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string())),
        }
    }

    fn is_background_model(model: &str) -> bool {
        model.contains("deep-research")
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
        if Self::is_background_model(&request.model) {
            let resp = self
                .client
                .post(format!("{}/responses", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "model": request.model,
                    "input": request.prompt,
                    "background": true,
                }))
                .send()
                .await
                .map_err(|e| timeout_error(&e))?;
            if !resp.status().is_success() {
                return Err(request_error(resp).await);
            }
            let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
            let external_id = body.get("id").and_then(Value::as_str).map(str::to_string);
            Ok(SubmitResult {
                external_id,
                initial_status: ProviderStatus::Queued,
                synchronous_result: None,
            })
        } else {
            let resp = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "model": request.model,
                    "messages": [{"role": "user", "content": request.prompt}],
                }))
                .send()
                .await
                .map_err(|e| timeout_error(&e))?;
            if !resp.status().is_success() {
                return Err(request_error(resp).await);
            }
            let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
            let text = extract_text_from_json(&body, &["/choices/0/message/content"])
                .unwrap_or_default();
            let usage = TokenUsage {
                input: body.pointer("/usage/prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                output: body.pointer("/usage/completion_tokens").and_then(Value::as_u64).unwrap_or(0),
                reasoning: 0,
            };
            let artifact = artifact_from_text(Uuid::nil(), text, vec![], usage, body);
            Ok(SubmitResult {
                external_id: None,
                initial_status: ProviderStatus::Succeeded,
                synchronous_result: Some(artifact),
            })
        }
    }

    async fn status(&self, external_id: &str) -> Result<ProviderStatus, AdapterError> {
        let resp = self
            .client
            .get(format!("{}/responses/{external_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| timeout_error(&e))?;
        if !resp.status().is_success() {
            return Err(request_error(resp).await);
        }
        let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
        Ok(match body.get("status").and_then(Value::as_str) {
            Some("completed") => ProviderStatus::Succeeded,
            Some("failed") => ProviderStatus::Failed,
            Some("cancelled") => ProviderStatus::Canceled,
            Some("in_progress") => ProviderStatus::Running,
            _ => ProviderStatus::Queued,
        })
    }

    async fn fetch(&self, external_id: &str) -> Result<research_types::Artifact, AdapterError> {
        let resp = self
            .client
            .get(format!("{}/responses/{external_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| timeout_error(&e))?;
        if !resp.status().is_success() {
            return Err(request_error(resp).await);
        }
        let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
        let text = extract_text_from_json(&body, &["/output_text"]).unwrap_or_default();
        let usage = TokenUsage {
            input: body.pointer("/usage/input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output: body.pointer("/usage/output_tokens").and_then(Value::as_u64).unwrap_or(0),
            reasoning: body.pointer("/usage/reasoning_tokens").and_then(Value::as_u64).unwrap_or(0),
        };
        Ok(artifact_from_text(Uuid::nil(), text, vec![], usage, body))
    }

    async fn cancel(&self, external_id: &str) -> bool {
        self.client
            .post(format!("{}/responses/{external_id}/cancel", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Azure OpenAI: synchronous chat completions behind a deployment URL.
pub struct AzureAdapter {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
}

impl AzureAdapter {
    pub fn new(api_key: String, base_url: String, api_version: Option<String>) -> Self {
        AzureAdapter {
            client: Client::new(),
            api_key,
            base_url: normalize_base(&base_url),
            api_version: api_version.unwrap_or_else(|| "2024-06-01".to_string()),
        }
    }
}

#[async_trait]
impl Adapter for AzureAdapter {
    fn provider_id(&self) -> &str {
        "azure"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.base_url, request.model, self.api_version
        );
        let resp = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .json(&json!({ "messages": [{"role": "user", "content": request.prompt}] }))
            .send()
            .await
            .map_err(|e| timeout_error(&e))?;
        if !resp.status().is_success() {
            return Err(request_error(resp).await);
        }
        let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
        let text = extract_text_from_json(&body, &["/choices/0/message/content"]).unwrap_or_default();
        let usage = TokenUsage {
            input: body.pointer("/usage/prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            output: body.pointer("/usage/completion_tokens").and_then(Value::as_u64).unwrap_or(0),
            reasoning: 0,
        };
        let artifact = artifact_from_text(Uuid::nil(), text, vec![], usage, body);
        Ok(SubmitResult {
            external_id: None,
            initial_status: ProviderStatus::Succeeded,
            synchronous_result: Some(artifact),
        })
    }

    async fn status(&self, _external_id: &str) -> Result<ProviderStatus, AdapterError> {
        Ok(ProviderStatus::Succeeded)
    }

    async fn fetch(&self, _external_id: &str) -> Result<research_types::Artifact, AdapterError> {
        Err(AdapterError {
            status: None,
            timed_out: false,
            message: "azure adapter is synchronous; fetch is never called".to_string(),
            raw: empty_raw(),
        })
    }

    async fn cancel(&self, _external_id: &str) -> bool {
        true
    }
}

/// Google Gemini: synchronous `generateContent`.
pub struct GeminiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        GeminiAdapter {
            client: Client::new(),
            api_key,
            base_url: normalize_base(
                &base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            ),
        }
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn provider_id(&self) -> &str {
        "gemini"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let resp = self
            .client
            .post(url)
            .json(&json!({
                "contents": [{ "parts": [{ "text": request.prompt }] }]
            }))
            .send()
            .await
            .map_err(|e| timeout_error(&e))?;
        if !resp.status().is_success() {
            return Err(request_error(resp).await);
        }
        let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
        let text = extract_text_from_json(&body, &["/candidates/0/content/parts/0/text"]).unwrap_or_default();
        let usage = TokenUsage {
            input: body.pointer("/usageMetadata/promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
            output: body.pointer("/usageMetadata/candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0),
            reasoning: 0,
        };
        let artifact = artifact_from_text(Uuid::nil(), text, vec![], usage, body);
        Ok(SubmitResult {
            external_id: None,
            initial_status: ProviderStatus::Succeeded,
            synchronous_result: Some(artifact),
        })
    }

    async fn status(&self, _external_id: &str) -> Result<ProviderStatus, AdapterError> {
        Ok(ProviderStatus::Succeeded)
    }

    async fn fetch(&self, _external_id: &str) -> Result<research_types::Artifact, AdapterError> {
        Err(AdapterError {
            status: None,
            timed_out: false,
            message: "gemini adapter is synchronous; fetch is never called".to_string(),
            raw: empty_raw(),
        })
    }

    async fn cancel(&self, _external_id: &str) -> bool {
        true
    }
}

/// xAI Grok: OpenAI-compatible synchronous chat completions.
pub struct GrokAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GrokAdapter {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        GrokAdapter {
            client: Client::new(),
            api_key,
            base_url: normalize_base(&base_url.unwrap_or_else(|| "https://api.x.ai/v1".to_string())),
        }
    }
}

#[async_trait]
impl Adapter for GrokAdapter {
    fn provider_id(&self) -> &str {
        "grok"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": request.model,
                "messages": [{"role": "user", "content": request.prompt}],
            }))
            .send()
            .await
            .map_err(|e| timeout_error(&e))?;
        if !resp.status().is_success() {
            return Err(request_error(resp).await);
        }
        let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
        let text = extract_text_from_json(&body, &["/choices/0/message/content"]).unwrap_or_default();
        let usage = TokenUsage {
            input: body.pointer("/usage/prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            output: body.pointer("/usage/completion_tokens").and_then(Value::as_u64).unwrap_or(0),
            reasoning: 0,
        };
        let artifact = artifact_from_text(Uuid::nil(), text, vec![], usage, body);
        Ok(SubmitResult {
            external_id: None,
            initial_status: ProviderStatus::Succeeded,
            synchronous_result: Some(artifact),
        })
    }

    async fn status(&self, _external_id: &str) -> Result<ProviderStatus, AdapterError> {
        Ok(ProviderStatus::Succeeded)
    }

    async fn fetch(&self, _external_id: &str) -> Result<research_types::Artifact, AdapterError> {
        Err(AdapterError {
            status: None,
            timed_out: false,
            message: "grok adapter is synchronous; fetch is never called".to_string(),
            raw: empty_raw(),
        })
    }

    async fn cancel(&self, _external_id: &str) -> bool {
        true
    }
}

/// Anthropic. The Messages API answers synchronously; the deep-research
/// variant submits a background run polled via a message-batches-style id.
pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        AnthropicAdapter {
            client: Client::new(),
            api_key,
            base_url: normalize_base(&base_url.unwrap_or_else(|| "https://api.anthropic.com/v1".to_string())),
        }
    }

    fn is_background_model(model: &str) -> bool {
        model.contains("deep-research")
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
        if Self::is_background_model(&request.model) {
            let resp = self
                .client
                .post(format!("{}/messages/batches", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&json!({
                    "model": request.model,
                    "requests": [{ "custom_id": request.client_token, "params": {
                        "model": request.model,
                        "max_tokens": 8192,
                        "messages": [{"role": "user", "content": request.prompt}],
                    }}],
                }))
                .send()
                .await
                .map_err(|e| timeout_error(&e))?;
            if !resp.status().is_success() {
                return Err(request_error(resp).await);
            }
            let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
            let external_id = body.get("id").and_then(Value::as_str).map(str::to_string);
            return Ok(SubmitResult {
                external_id,
                initial_status: ProviderStatus::Queued,
                synchronous_result: None,
            });
        }

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": request.model,
                "max_tokens": 8192,
                "messages": [{"role": "user", "content": request.prompt}],
            }))
            .send()
            .await
            .map_err(|e| timeout_error(&e))?;
        if !resp.status().is_success() {
            return Err(request_error(resp).await);
        }
        let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
        let text = extract_text_from_json(&body, &["/content/0/text"]).unwrap_or_default();
        let usage = TokenUsage {
            input: body.pointer("/usage/input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output: body.pointer("/usage/output_tokens").and_then(Value::as_u64).unwrap_or(0),
            reasoning: 0,
        };
        let artifact = artifact_from_text(Uuid::nil(), text, vec![], usage, body);
        Ok(SubmitResult {
            external_id: None,
            initial_status: ProviderStatus::Succeeded,
            synchronous_result: Some(artifact),
        })
    }

    async fn status(&self, external_id: &str) -> Result<ProviderStatus, AdapterError> {
        let resp = self
            .client
            .get(format!("{}/messages/batches/{external_id}", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .send()
            .await
            .map_err(|e| timeout_error(&e))?;
        if !resp.status().is_success() {
            return Err(request_error(resp).await);
        }
        let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
        Ok(match body.get("processing_status").and_then(Value::as_str) {
            Some("ended") => ProviderStatus::Succeeded,
            Some("canceling") => ProviderStatus::Canceled,
            Some("in_progress") => ProviderStatus::Running,
            _ => ProviderStatus::Queued,
        })
    }

    async fn fetch(&self, external_id: &str) -> Result<research_types::Artifact, AdapterError> {
        let resp = self
            .client
            .get(format!("{}/messages/batches/{external_id}/results", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .send()
            .await
            .map_err(|e| timeout_error(&e))?;
        if !resp.status().is_success() {
            return Err(request_error(resp).await);
        }
        let body: Value = resp.json().await.map_err(|e| timeout_error(&e))?;
        let text = extract_text_from_json(&body, &["/0/result/message/content/0/text"]).unwrap_or_default();
        Ok(artifact_from_text(Uuid::nil(), text, vec![], TokenUsage::default(), body))
    }

    async fn cancel(&self, external_id: &str) -> bool {
        self.client
            .post(format!("{}/messages/batches/{external_id}/cancel", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
