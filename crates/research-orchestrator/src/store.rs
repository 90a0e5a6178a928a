use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use research_types::CampaignPlan;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

const CAMPAIGN_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CampaignFile {
    schema_version: u32,
    campaigns: Vec<CampaignPlan>,
}

/// Durable store for campaign plans (C9), flushed to a single JSON document
/// the same way the job queue is: every mutation persists before returning.
pub struct CampaignStore {
    path: PathBuf,
    campaigns: RwLock<HashMap<Uuid, CampaignPlan>>,
}

impl CampaignStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let campaigns = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: CampaignFile = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing campaign file {}", path.display()))?;
                file.campaigns.into_iter().map(|c| (c.id, c)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e).context("reading campaign file"),
        };
        Ok(CampaignStore { path, campaigns: RwLock::new(campaigns) })
    }

    async fn flush(&self, campaigns: &HashMap<Uuid, CampaignPlan>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let file = CampaignFile {
            schema_version: CAMPAIGN_SCHEMA_VERSION,
            campaigns: campaigns.values().cloned().collect(),
        };
        let body = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("writing campaign file {}", self.path.display()))
    }

    pub async fn put(&self, plan: CampaignPlan) -> Result<CampaignPlan> {
        let mut campaigns = self.campaigns.write().await;
        campaigns.insert(plan.id, plan.clone());
        self.flush(&campaigns).await?;
        Ok(plan)
    }

    pub async fn get(&self, id: Uuid) -> Option<CampaignPlan> {
        self.campaigns.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<CampaignPlan> {
        self.campaigns.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_types::PhaseSpec;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("research-engine-campaign-store-test-{name}-{}", Uuid::new_v4()))
    }

    fn sample_plan() -> CampaignPlan {
        CampaignPlan::new(
            "market sizing".to_string(),
            vec![PhaseSpec {
                title: "Discovery".to_string(),
                prompt_template: "Survey {scenario}".to_string(),
                depends_on_context_from_prior_phases: false,
                review_required: false,
            }],
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips_a_campaign() {
        let path = temp_path("basic.json");
        let store = CampaignStore::open(&path).await.unwrap();
        let plan = sample_plan();
        store.put(plan.clone()).await.unwrap();

        let fetched = store.get(plan.id).await.unwrap();
        assert_eq!(fetched.scenario, "market sizing");
        assert_eq!(fetched.phases.len(), 1);
    }

    #[tokio::test]
    async fn reopening_the_store_reloads_persisted_campaigns() {
        let path = temp_path("reload.json");
        let plan = sample_plan();
        {
            let store = CampaignStore::open(&path).await.unwrap();
            store.put(plan.clone()).await.unwrap();
        }

        let reopened = CampaignStore::open(&path).await.unwrap();
        let all = reopened.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, plan.id);
    }

    #[tokio::test]
    async fn opening_a_missing_file_starts_empty() {
        let path = temp_path("missing.json");
        let store = CampaignStore::open(&path).await.unwrap();
        assert!(store.list().await.is_empty());
    }
}
