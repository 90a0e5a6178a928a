use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobStatus;
use crate::money::Money;

/// Lifecycle events published on the Event Bus for external surfaces
/// (CLI, dashboard, MCP) to consume; the engine never blocks on a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    JobCreated {
        job_id: Uuid,
        at: DateTime<Utc>,
    },
    JobStatusChanged {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
        at: DateTime<Utc>,
    },
    JobCompleted {
        job_id: Uuid,
        at: DateTime<Utc>,
    },
    JobFailed {
        job_id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
    JobCanceled {
        job_id: Uuid,
        at: DateTime<Utc>,
    },
    CampaignPhaseStarted {
        campaign_id: Uuid,
        phase_index: usize,
        at: DateTime<Utc>,
    },
    CampaignPhaseCompleted {
        campaign_id: Uuid,
        phase_index: usize,
        at: DateTime<Utc>,
    },
    CampaignPaused {
        campaign_id: Uuid,
        phase_index: usize,
        at: DateTime<Utc>,
    },
    BudgetAlert {
        threshold_pct: u8,
        remaining: Money,
        at: DateTime<Utc>,
    },
    ProviderAutoDisabled {
        provider: String,
        until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
}
