use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorClass;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Focus,
    Docs,
    ProjectPhase,
    TeamPerspective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    WebSearch,
    CodeInterpreter,
    FileSearch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderChoice {
    Auto,
    Explicit { provider: String, model: String },
}

impl Default for ProviderChoice {
    fn default() -> Self {
        ProviderChoice::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

/// One submission attempt, retained in full (never truncated to "just the
/// last") so the fallback chain's history survives the job's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub model: String,
    pub error_class: Option<ErrorClass>,
    pub at: DateTime<Utc>,
}

pub const MAX_FALLBACK_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub prompt: String,
    pub mode: JobMode,
    pub provider_choice: ProviderChoice,
    pub chosen_provider: Option<String>,
    pub chosen_model: Option<String>,
    pub external_id: Option<String>,
    pub status: JobStatus,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub cost_estimate: Option<Money>,
    pub cost_actual: Option<Money>,
    pub tools: Vec<ToolKind>,
    pub context_refs: Vec<Uuid>,
    pub parent_campaign: Option<Uuid>,
    pub metadata: HashMap<String, String>,
    pub idempotency_key: Option<String>,
    pub attempt_log: Vec<AttemptRecord>,
    pub failure_reason: Option<String>,
}

impl Job {
    pub fn new(
        prompt: String,
        mode: JobMode,
        provider_choice: ProviderChoice,
        priority: u8,
        tools: Vec<ToolKind>,
        parent_campaign: Option<Uuid>,
        idempotency_key: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Job {
            id: Uuid::new_v4(),
            prompt,
            mode,
            provider_choice,
            chosen_provider: None,
            chosen_model: None,
            external_id: None,
            status: JobStatus::Pending,
            priority: priority.clamp(1, 5),
            created_at: Utc::now(),
            submitted_at: None,
            completed_at: None,
            attempts: 0,
            lease_owner: None,
            lease_expires_at: None,
            cost_estimate: None,
            cost_actual: None,
            tools,
            context_refs: Vec::new(),
            parent_campaign,
            metadata,
            idempotency_key,
            attempt_log: Vec::new(),
            failure_reason: None,
        }
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}
