use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobMode;

/// Rolling latency/success state for one provider, exclusively owned and
/// mutated by the Router. Other components read a cloned snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    /// Last N completion latencies in milliseconds, used to derive p50/p95/p99.
    pub recent_latencies_ms: Vec<u64>,
    pub success_rate_by_task_type: HashMap<JobMode, f64>,
    pub consecutive_failures: u32,
    pub disabled_until: Option<DateTime<Utc>>,
}

pub const HEALTH_WINDOW: usize = 100;

impl ProviderHealth {
    pub fn new(provider_id: impl Into<String>) -> Self {
        ProviderHealth {
            provider_id: provider_id.into(),
            recent_latencies_ms: Vec::new(),
            success_rate_by_task_type: HashMap::new(),
            consecutive_failures: 0,
            disabled_until: None,
        }
    }

    pub fn is_disabled(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn record_latency(&mut self, ms: u64) {
        self.recent_latencies_ms.push(ms);
        if self.recent_latencies_ms.len() > HEALTH_WINDOW {
            self.recent_latencies_ms.remove(0);
        }
    }

    fn percentile(&self, pct: f64) -> u64 {
        if self.recent_latencies_ms.is_empty() {
            return 0;
        }
        let mut sorted = self.recent_latencies_ms.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    pub fn p95(&self) -> u64 {
        self.percentile(0.95)
    }

    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    pub fn success_rate(&self, mode: JobMode) -> f64 {
        *self.success_rate_by_task_type.get(&mode).unwrap_or(&1.0)
    }
}
