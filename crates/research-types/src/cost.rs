use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostKind {
    Estimate,
    Realized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub job_id: Uuid,
    pub provider: String,
    pub model: String,
    pub kind: CostKind,
    pub amount: Money,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Day,
    Month,
}
