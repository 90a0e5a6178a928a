use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use research_types::{CampaignPlan, CampaignStatus, PhaseResult, PhaseSpec};

/// Inputs the reducer can react to; every field it needs to know about a
/// campaign's progress arrives as one of these instead of reaching back into
/// shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignEvent {
    PhaseJobSubmitted { phase_index: usize, job_id: Uuid },
    PhaseCompleted { phase_index: usize, job_id: Uuid, artifact_id: Uuid },
    PhaseFailed { phase_index: usize, reason: String },
    ReviewApproved { phase_index: usize },
    ReviewRejected { phase_index: usize, reason: String },
    PauseRequested { reason: String },
    ResumeRequested,
}

/// Side effects the executor performs outside the pure state transition:
/// submitting the next phase's job, or emitting a lifecycle notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignCommand {
    SubmitNextPhase { phase_index: usize },
    EmitNotice { event_type: String, phase_index: usize },
    CampaignFinished,
}
