//! HTTP-facing DTOs for the engine's agent-facing RPC surface (§6a). These
//! are thin, serde-only shapes; the HTTP binding maps them to/from domain
//! types at the route boundary so the engine's internal model never leaks
//! serde quirks into the wire format or vice versa.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use research_types::{
    CampaignPlan, CampaignStatus, EngineError, Job, JobMode, JobStatus, Money, ProviderChoice,
    ToolKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct JobRequestWire {
    pub prompt: String,
    #[serde(default)]
    pub mode: Option<JobMode>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub tools: Vec<ToolKind>,
    #[serde(default)]
    pub parent_campaign: Option<Uuid>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl JobRequestWire {
    pub fn provider_choice(&self) -> ProviderChoice {
        match (&self.provider, &self.model) {
            (Some(provider), Some(model)) => ProviderChoice::Explicit {
                provider: provider.clone(),
                model: model.clone(),
            },
            _ => ProviderChoice::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub prompt: String,
    pub mode: JobMode,
    pub status: JobStatus,
    pub chosen_provider: Option<String>,
    pub chosen_model: Option<String>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub cost_estimate: Option<Money>,
    pub cost_actual: Option<Money>,
    pub parent_campaign: Option<Uuid>,
    pub failure_reason: Option<String>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        JobView {
            id: job.id,
            prompt: job.prompt.clone(),
            mode: job.mode,
            status: job.status,
            chosen_provider: job.chosen_provider.clone(),
            chosen_model: job.chosen_model.clone(),
            priority: job.priority,
            created_at: job.created_at,
            submitted_at: job.submitted_at,
            completed_at: job.completed_at,
            attempts: job.attempts,
            cost_estimate: job.cost_estimate,
            cost_actual: job.cost_actual,
            parent_campaign: job.parent_campaign,
            failure_reason: job.failure_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    pub campaign: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhaseSpecWire {
    pub title: String,
    pub prompt_template: String,
    #[serde(default)]
    pub depends_on_context_from_prior_phases: bool,
    #[serde(default)]
    pub review_required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignRequestWire {
    pub scenario: String,
    pub phases: Vec<PhaseSpecWire>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignView {
    pub id: Uuid,
    pub scenario: String,
    pub status: CampaignStatus,
    pub current_phase_index: usize,
    pub paused_reason: Option<String>,
    pub phase_count: usize,
    pub failure_reason: Option<String>,
}

impl From<&CampaignPlan> for CampaignView {
    fn from(plan: &CampaignPlan) -> Self {
        CampaignView {
            id: plan.id,
            scenario: plan.scenario.clone(),
            status: plan.status,
            current_phase_index: plan.current_phase_index,
            paused_reason: plan.paused_reason.clone(),
            phase_count: plan.phases.len(),
            failure_reason: plan.failure_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSummaryWire {
    pub period: String,
    pub estimate_total: Money,
    pub realized_total: Money,
    pub cap: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthWire {
    pub ready: bool,
    pub pending_jobs: usize,
    pub processing_jobs: usize,
    pub active_campaigns: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorWire {
    pub kind: String,
    pub message: String,
    pub retry_hint: Option<&'static str>,
}

impl From<&EngineError> for ErrorWire {
    fn from(err: &EngineError) -> Self {
        ErrorWire {
            kind: serde_json::to_value(err)
                .ok()
                .and_then(|v| v.get("kind").and_then(|k| k.as_str().map(str::to_string)))
                .unwrap_or_else(|| "unknown".to_string()),
            message: err.to_string(),
            retry_hint: err.retry_hint(),
        }
    }
}
