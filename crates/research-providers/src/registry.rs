use research_types::{ModeFamily, ModelInfo, Money, ToolKind};

use crate::{default_pricing, placeholder_model};

/// Static, compiled-in capabilities table (C4): pricing, context window,
/// tool support, mode family, and typical latency per model. One place to
/// edit when a provider's API or pricing changes.
pub struct ProviderRegistry {
    models: Vec<ModelInfo>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            models: vec![
                placeholder_model(
                    "openai",
                    "o3-deep-research",
                    "OpenAI o3 Deep Research",
                    200_000,
                    default_pricing(10.0, 40.0, 40.0),
                    ModeFamily::AsynchronousJob,
                    5,
                ),
                placeholder_model(
                    "openai",
                    "gpt-4o",
                    "OpenAI GPT-4o",
                    128_000,
                    default_pricing(2.5, 10.0, 0.0),
                    ModeFamily::Synchronous,
                    3,
                ),
                placeholder_model(
                    "azure",
                    "gpt-4o",
                    "Azure OpenAI GPT-4o",
                    128_000,
                    default_pricing(2.5, 10.0, 0.0),
                    ModeFamily::Synchronous,
                    3,
                ),
                placeholder_model(
                    "gemini",
                    "gemini-1.5-pro",
                    "Gemini 1.5 Pro",
                    1_000_000,
                    default_pricing(1.25, 5.0, 0.0),
                    ModeFamily::Synchronous,
                    4,
                ),
                placeholder_model(
                    "grok",
                    "grok-2",
                    "Grok 2",
                    131_000,
                    default_pricing(2.0, 10.0, 0.0),
                    ModeFamily::Synchronous,
                    2,
                ),
                placeholder_model(
                    "anthropic",
                    "claude-3-7-sonnet-deep-research",
                    "Claude 3.7 Sonnet Deep Research",
                    200_000,
                    default_pricing(3.0, 15.0, 15.0),
                    ModeFamily::AsynchronousJob,
                    5,
                ),
                placeholder_model(
                    "anthropic",
                    "claude-3-5-haiku",
                    "Claude 3.5 Haiku",
                    200_000,
                    default_pricing(0.8, 4.0, 0.0),
                    ModeFamily::Synchronous,
                    1,
                ),
            ],
        }
    }

    pub fn all(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn find(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Models supporting every requested tool, regardless of current
    /// provider health (health filtering is the Router's job).
    pub fn eligible_models(&self, required_tools: &[ToolKind]) -> Vec<&ModelInfo> {
        self.models
            .iter()
            .filter(|m| required_tools.iter().all(|t| m.supported_tools.contains(t)))
            .collect()
    }

    /// Heuristic pre-flight cost estimate: ~4 characters per input token, a
    /// fixed assumed output length, from Registry pricing.
    pub fn estimate(&self, model_id: &str, prompt_len_chars: usize) -> Money {
        let Some(model) = self.find(model_id) else {
            return Money::ZERO;
        };
        let input_tokens = (prompt_len_chars / 4).max(1) as u64;
        let assumed_output_tokens = 1_500u64;
        model.pricing.estimate(input_tokens, assumed_output_tokens, 0)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligible_models_filters_by_tool_support() {
        let registry = ProviderRegistry::new();
        let all = registry.eligible_models(&[]);
        assert!(!all.is_empty());
        let needing_code_interpreter = registry.eligible_models(&[ToolKind::CodeInterpreter]);
        assert!(needing_code_interpreter.is_empty());
    }

    #[test]
    fn estimate_scales_with_prompt_length() {
        let registry = ProviderRegistry::new();
        let short = registry.estimate("gpt-4o", 100);
        let long = registry.estimate("gpt-4o", 10_000);
        assert!(long > short);
    }
}
