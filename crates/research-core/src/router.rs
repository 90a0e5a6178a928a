use std::collections::HashMap;

use chrono::{Duration, Utc};
use rand::Rng;
use research_providers::ProviderRegistry;
use research_types::{ErrorClass, JobMode, Money, ProviderHealth, ToolKind};
use tokio::sync::RwLock;

const EXPLORATION_EPSILON: f64 = 0.10;
const DISABLE_AFTER_FAILURES: u32 = 5;
const DISABLE_DURATION: Duration = Duration::hours(1);

const W_QUALITY: f64 = 1.0;
const W_COST: f64 = 0.5;
const W_LATENCY: f64 = 0.001;
const W_SUCCESS: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub prompt: String,
    pub mode: JobMode,
    pub tools: Vec<ToolKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub provider: String,
    pub model: String,
    pub score: f64,
}

/// Health-scored provider+model selection with exploration and a fallback
/// chain (C6). `ProviderHealth` is exclusively owned here; every other
/// component reads a cloned snapshot.
pub struct Router {
    registry: ProviderRegistry,
    health: RwLock<HashMap<String, ProviderHealth>>,
}

impl Router {
    pub fn new(registry: ProviderRegistry) -> Self {
        Router {
            registry,
            health: RwLock::new(HashMap::new()),
        }
    }

    /// 0..1 complexity estimate from prompt length and tool requirements;
    /// feeds the required capability tier used in scoring.
    pub fn complexity_score(request: &RouteRequest) -> f64 {
        let length_factor = (request.prompt.len() as f64 / 2000.0).min(1.0);
        let tool_factor = (request.tools.len() as f64 / 3.0).min(1.0);
        (length_factor * 0.7 + tool_factor * 0.3).min(1.0)
    }

    fn required_tier(complexity: f64) -> f64 {
        1.0 + complexity * 4.0
    }

    pub async fn health_snapshot(&self, provider: &str) -> ProviderHealth {
        self.health
            .read()
            .await
            .get(provider)
            .cloned()
            .unwrap_or_else(|| ProviderHealth::new(provider))
    }

    /// Returns the ordered fallback chain (top 3 scorers) for an AUTO-mode
    /// request, respecting context window / tool support / circuit-disabled
    /// filtering.
    pub async fn select_chain(&self, request: &RouteRequest) -> Vec<Candidate> {
        let complexity = Self::complexity_score(request);
        let required_tier = Self::required_tier(complexity);
        let now = Utc::now();
        let health = self.health.read().await;

        let mut scored = Vec::new();
        for model in self.registry.eligible_models(&request.tools) {
            let h = health
                .get(&model.provider_id)
                .cloned()
                .unwrap_or_else(|| ProviderHealth::new(&model.provider_id));
            if h.is_disabled(now) {
                continue;
            }
            let estimated_cost = self.registry.estimate(&model.id, request.prompt.len());
            let quality = 1.0 - (model.tier as f64 - required_tier).abs() / 4.0;
            let latency = if h.p95() > 0 { h.p95() as f64 } else { model.typical_latency_ms as f64 };
            let success = h.success_rate(request.mode);
            let score = W_QUALITY * quality - W_COST * estimated_cost.as_dollars()
                + -W_LATENCY * latency
                + W_SUCCESS * success;
            scored.push(Candidate {
                provider: model.provider_id.clone(),
                model: model.id.clone(),
                score,
            });
        }
        drop(health);

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if scored.is_empty() {
            return scored;
        }

        let explore = rand::thread_rng().gen::<f64>() < EXPLORATION_EPSILON;
        if explore && scored.len() > 1 {
            let pick_idx = 1 + rand::thread_rng().gen_range(0..scored.len() - 1);
            scored.swap(0, pick_idx);
        }

        scored.truncate(3);
        scored
    }

    pub fn estimate(&self, model_id: &str, prompt_len: usize) -> Money {
        self.registry.estimate(model_id, prompt_len)
    }

    /// Realized cost from actual token usage once an artifact is in hand.
    pub fn realized_cost(&self, model_id: &str, usage: &research_types::TokenUsage) -> Money {
        match self.registry.find(model_id) {
            Some(model) => model.pricing.estimate(usage.input, usage.output, usage.reasoning),
            None => Money::ZERO,
        }
    }

    pub async fn record_result(
        &self,
        provider: &str,
        mode: JobMode,
        success: bool,
        latency_ms: u64,
    ) -> bool {
        let mut health = self.health.write().await;
        let entry = health
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealth::new(provider));
        entry.record_latency(latency_ms);
        let prior = entry.success_rate(mode);
        let updated = prior * 0.95 + if success { 0.05 } else { 0.0 };
        entry.success_rate_by_task_type.insert(mode, updated);

        if success {
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
        }

        if entry.consecutive_failures >= DISABLE_AFTER_FAILURES {
            entry.disabled_until = Some(Utc::now() + DISABLE_DURATION);
            true
        } else {
            false
        }
    }

    /// Per-error-class decision for in-flight failures (§4.4): whether to
    /// retry the same provider once before falling back.
    pub fn retry_same_provider_first(error_class: ErrorClass) -> bool {
        matches!(error_class, ErrorClass::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_score_increases_with_prompt_length_and_tools() {
        let short = RouteRequest {
            prompt: "hi".to_string(),
            mode: JobMode::Focus,
            tools: vec![],
        };
        let long = RouteRequest {
            prompt: "x".repeat(3000),
            mode: JobMode::Docs,
            tools: vec![ToolKind::WebSearch, ToolKind::FileSearch],
        };
        assert!(Router::complexity_score(&long) > Router::complexity_score(&short));
    }

    #[tokio::test]
    async fn five_consecutive_failures_disable_the_provider_the_sixth_does_not_retrip() {
        let router = Router::new(ProviderRegistry::new());
        for _ in 0..4 {
            let tripped = router.record_result("openai", JobMode::Focus, false, 500).await;
            assert!(!tripped);
        }
        let tripped = router.record_result("openai", JobMode::Focus, false, 500).await;
        assert!(tripped);

        let health = router.health_snapshot("openai").await;
        assert!(health.is_disabled(Utc::now()));
    }
}
