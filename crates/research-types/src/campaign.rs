use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub title: String,
    pub prompt_template: String,
    pub depends_on_context_from_prior_phases: bool,
    pub review_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Planned,
    Running,
    Paused,
    AwaitingReview,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_index: usize,
    pub artifact_id: Uuid,
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPlan {
    pub id: Uuid,
    pub scenario: String,
    pub phases: Vec<PhaseSpec>,
    pub status: CampaignStatus,
    pub current_phase_index: usize,
    pub paused_reason: Option<String>,
    pub phase_results: Vec<PhaseResult>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CampaignPlan {
    pub fn new(scenario: String, phases: Vec<PhaseSpec>) -> Self {
        CampaignPlan {
            id: Uuid::new_v4(),
            scenario,
            phases,
            status: CampaignStatus::Planned,
            current_phase_index: 0,
            paused_reason: None,
            phase_results: Vec::new(),
            failure_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status == CampaignStatus::Paused
    }
}
