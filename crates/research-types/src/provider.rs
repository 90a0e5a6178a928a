use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::ToolKind;
use crate::money::Money;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(alias = "providerID", alias = "providerId")]
    pub provider_id: String,
    #[serde(alias = "modelID", alias = "modelId")]
    pub model_id: String,
}

/// Whether a provider returns results inline on submit or must be polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeFamily {
    Synchronous,
    AsynchronousJob,
}

/// Per-million-token pricing, in whichever of the three token classes the
/// model bills for. Unsupported classes are priced at zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub reasoning_per_million: f64,
}

impl TokenPricing {
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64, reasoning_tokens: u64) -> Money {
        Money::from_tokens(input_tokens, self.input_per_million)
            + Money::from_tokens(output_tokens, self.output_per_million)
            + Money::from_tokens(reasoning_tokens, self.reasoning_per_million)
    }
}

/// The Registry's static, compiled-in capabilities row for one model. One
/// place to edit when a provider's API or pricing changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider_id: String,
    pub display_name: String,
    pub context_window: usize,
    pub pricing: TokenPricing,
    pub supported_tools: Vec<ToolKind>,
    pub mode_family: ModeFamily,
    pub typical_latency_ms: u64,
    pub timeout: Duration,
    /// Relative capability tier used by the Router's complexity scoring;
    /// higher tiers score better against harder prompts.
    pub tier: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}
