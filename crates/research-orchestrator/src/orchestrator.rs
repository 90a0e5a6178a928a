use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use research_core::{ArtifactStore, EngineFacade, EventBus, SubmitOutcome};
use research_types::{CampaignPlan, EngineEvent, JobMode, ProviderChoice};
use uuid::Uuid;

use crate::context::{build_context, cap_words, PriorPhase};
use crate::model::{CampaignCommand, CampaignEvent};
use crate::reducer::CampaignReducer;
use crate::store::CampaignStore;

/// Drives a `CampaignPlan` through its phases (C9). Every transition goes
/// through `CampaignReducer`; this struct's job is to perform the commands
/// the reducer returns: submit the next phase's job, persist the plan, and
/// emit lifecycle events.
pub struct CampaignOrchestrator {
    facade: Arc<EngineFacade>,
    artifacts: Arc<ArtifactStore>,
    store: Arc<CampaignStore>,
    events: EventBus,
    /// Approximate context window (in tokens) assumed for phase prompts when
    /// the chosen model isn't known yet at plan time.
    default_context_window_tokens: usize,
}

impl CampaignOrchestrator {
    pub fn new(
        facade: Arc<EngineFacade>,
        artifacts: Arc<ArtifactStore>,
        store: Arc<CampaignStore>,
        events: EventBus,
    ) -> Self {
        CampaignOrchestrator {
            facade,
            artifacts,
            store,
            events,
            default_context_window_tokens: 128_000,
        }
    }

    pub async fn plan(&self, scenario: String, phases: Vec<research_types::PhaseSpec>) -> Result<CampaignPlan, String> {
        if phases.is_empty() {
            return Err("a campaign needs at least one phase".to_string());
        }
        let plan = CampaignPlan::new(scenario, phases);
        self.store.put(plan.clone()).await.map_err(|e| e.to_string())
    }

    pub async fn get(&self, id: Uuid) -> Option<CampaignPlan> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Vec<CampaignPlan> {
        self.store.list().await
    }

    pub async fn execute(&self, id: Uuid) -> Result<CampaignPlan, String> {
        let plan = self.store.get(id).await.ok_or_else(|| "campaign not found".to_string())?;
        let job_id = self.submit_phase(&plan, 0).await?;
        let (next, _) = CampaignReducer::reduce(&plan, CampaignEvent::PhaseJobSubmitted { phase_index: 0, job_id });
        self.events.publish(EngineEvent::CampaignPhaseStarted { campaign_id: id, phase_index: 0, at: Utc::now() });
        self.store.put(next.clone()).await.map_err(|e| e.to_string())
    }

    pub async fn pause(&self, id: Uuid, reason: String) -> Result<CampaignPlan, String> {
        let plan = self.store.get(id).await.ok_or_else(|| "campaign not found".to_string())?;
        let (next, _) = CampaignReducer::reduce(&plan, CampaignEvent::PauseRequested { reason });
        self.events.publish(EngineEvent::CampaignPaused {
            campaign_id: id,
            phase_index: next.current_phase_index,
            at: Utc::now(),
        });
        self.store.put(next).await.map_err(|e| e.to_string())
    }

    pub async fn resume(&self, id: Uuid) -> Result<CampaignPlan, String> {
        let plan = self.store.get(id).await.ok_or_else(|| "campaign not found".to_string())?;
        let (next, commands) = CampaignReducer::reduce(&plan, CampaignEvent::ResumeRequested);
        let mut stored = self.store.put(next).await.map_err(|e| e.to_string())?;
        for command in commands {
            if let CampaignCommand::SubmitNextPhase { phase_index } = command {
                let job_id = self.submit_phase(&stored, phase_index).await?;
                let (after_submit, _) = CampaignReducer::reduce(
                    &stored,
                    CampaignEvent::PhaseJobSubmitted { phase_index, job_id },
                );
                stored = self.store.put(after_submit).await.map_err(|e| e.to_string())?;
            }
        }
        Ok(stored)
    }

    async fn submit_phase(&self, plan: &CampaignPlan, phase_index: usize) -> Result<Uuid, String> {
        let phase = plan.phases.get(phase_index).ok_or_else(|| "phase index out of range".to_string())?;
        let mut prompt = phase.prompt_template.replace("{scenario}", &plan.scenario);

        if phase.depends_on_context_from_prior_phases {
            let mut prior = Vec::new();
            for result in &plan.phase_results {
                if let Some(title) = plan.phases.get(result.phase_index).map(|p| p.title.clone()) {
                    if let Some(job) = self.facade.get(&result.job_id.to_string()).await.ok() {
                        if let Ok(Some(markdown)) = self.artifacts.read_markdown(&job).await {
                            prior.push(PriorPhase {
                                phase_index: result.phase_index,
                                title,
                                leading_words: cap_words(&markdown),
                            });
                        }
                    }
                }
            }
            let context = build_context(prior, self.default_context_window_tokens);
            if !context.is_empty() {
                prompt = format!("{context}\n\n---\n\n{prompt}");
            }
        }

        let outcome = self
            .facade
            .submit(
                prompt,
                JobMode::ProjectPhase,
                ProviderChoice::Auto,
                3,
                vec![],
                Some(plan.id),
                None,
                HashMap::new(),
                false,
            )
            .await
            .map_err(|e| e.to_string())?;

        match outcome {
            SubmitOutcome::Created(job) | SubmitOutcome::AlreadySubmitted(job) => Ok(job.id),
            SubmitOutcome::RequiresConfirmation { reason } => Err(reason),
        }
    }

    /// Reacts to job lifecycle events belonging to a campaign's current
    /// phase; call once per event received from `EngineFacade::subscribe`.
    pub async fn handle_engine_event(&self, event: &EngineEvent) {
        let (job_id, outcome) = match event {
            EngineEvent::JobCompleted { job_id, .. } => (*job_id, true),
            EngineEvent::JobFailed { job_id, .. } => (*job_id, false),
            _ => return,
        };

        let Ok(job) = self.facade.get(&job_id.to_string()).await else { return };
        let Some(campaign_id) = job.parent_campaign else { return };
        let Some(plan) = self.store.get(campaign_id).await else { return };
        if plan.current_phase_index >= plan.phases.len() {
            return;
        }
        let phase_index = plan.current_phase_index;

        let campaign_event = if outcome {
            CampaignEvent::PhaseCompleted { phase_index, job_id, artifact_id: job_id }
        } else {
            CampaignEvent::PhaseFailed {
                phase_index,
                reason: job.failure_reason.clone().unwrap_or_else(|| "unknown failure".to_string()),
            }
        };

        let (next, commands) = CampaignReducer::reduce(&plan, campaign_event);
        let mut stored = match self.store.put(next).await {
            Ok(p) => p,
            Err(_) => return,
        };

        if outcome {
            self.events.publish(EngineEvent::CampaignPhaseCompleted {
                campaign_id,
                phase_index,
                at: Utc::now(),
            });
        }

        for command in commands {
            match command {
                CampaignCommand::SubmitNextPhase { phase_index } => {
                    if let Ok(job_id) = self.submit_phase(&stored, phase_index).await {
                        self.events.publish(EngineEvent::CampaignPhaseStarted {
                            campaign_id,
                            phase_index,
                            at: Utc::now(),
                        });
                        let (after_submit, _) = CampaignReducer::reduce(
                            &stored,
                            CampaignEvent::PhaseJobSubmitted { phase_index, job_id },
                        );
                        if let Ok(p) = self.store.put(after_submit).await {
                            stored = p;
                        }
                    }
                }
                CampaignCommand::EmitNotice { .. } | CampaignCommand::CampaignFinished => {}
            }
        }
    }

    /// Spawns a task that feeds every engine event into `handle_engine_event`.
    pub fn spawn_event_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut rx = self.facade.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle_engine_event(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use research_core::{ConfigStore, CostGovernor, CostLedger, EventBus, JobQueue, Router};
    use research_providers::{Adapter, AdapterError, ProviderRegistry, ProviderStatus, SubmitRequest, SubmitResult};
    use research_types::{Artifact, PhaseSpec, TokenUsage};
    use std::path::PathBuf;

    struct AlwaysSucceedsAdapter;

    #[async_trait]
    impl Adapter for AlwaysSucceedsAdapter {
        fn provider_id(&self) -> &str {
            "openai"
        }

        async fn submit(&self, _request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
            Ok(SubmitResult {
                external_id: None,
                initial_status: ProviderStatus::Succeeded,
                synchronous_result: Some(Artifact {
                    job_id: Uuid::nil(),
                    markdown_body: "phase report".to_string(),
                    citations: vec![],
                    token_usage: TokenUsage { input: 10, output: 20, reasoning: 0 },
                    provider_raw: serde_json::json!({}),
                    created_at: Utc::now(),
                }),
            })
        }

        async fn status(&self, _external_id: &str) -> Result<ProviderStatus, AdapterError> {
            unreachable!()
        }

        async fn fetch(&self, _external_id: &str) -> Result<Artifact, AdapterError> {
            unreachable!()
        }

        async fn cancel(&self, _external_id: &str) -> bool {
            true
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("research-engine-orchestrator-test-{name}-{}", Uuid::new_v4()))
    }

    async fn harness() -> CampaignOrchestrator {
        let queue = Arc::new(JobQueue::open(temp_path("queue.json")).await.unwrap());
        let router = Arc::new(Router::new(ProviderRegistry::new()));
        let ledger = Arc::new(CostLedger::open(temp_path("ledger.json")).await.unwrap());
        let governor =
            Arc::new(CostGovernor::new(ledger.clone(), research_core::EngineConfig::default().budget));
        let artifacts = Arc::new(ArtifactStore::new(temp_path("artifacts")));
        let events = EventBus::new();
        let config = Arc::new(ConfigStore::new(temp_path("config.json")).await.unwrap());

        let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert("openai".to_string(), Arc::new(AlwaysSucceedsAdapter));

        let facade = Arc::new(EngineFacade::new(
            queue, router, governor, ledger, artifacts.clone(), events.clone(), config, adapters,
        ));
        let store = Arc::new(CampaignStore::open(temp_path("campaigns.json")).await.unwrap());

        CampaignOrchestrator::new(facade, artifacts, store, events)
    }

    fn two_phase_plan() -> Vec<PhaseSpec> {
        vec![
            PhaseSpec {
                title: "Discovery".to_string(),
                prompt_template: "Survey the landscape for {scenario}".to_string(),
                depends_on_context_from_prior_phases: false,
                review_required: false,
            },
            PhaseSpec {
                title: "Synthesis".to_string(),
                prompt_template: "Synthesize findings for {scenario}".to_string(),
                depends_on_context_from_prior_phases: true,
                review_required: true,
            },
        ]
    }

    #[tokio::test]
    async fn executing_then_completing_a_non_review_phase_advances_to_the_next_phase() {
        let orchestrator = harness().await;
        let plan = orchestrator.plan("market sizing".to_string(), two_phase_plan()).await.unwrap();
        let executed = orchestrator.execute(plan.id).await.unwrap();
        assert_eq!(executed.status, CampaignStatus::Running);

        let job = orchestrator.facade.list(None, Some(plan.id)).await.into_iter().next().unwrap();
        orchestrator
            .handle_engine_event(&EngineEvent::JobCompleted { job_id: job.id, at: Utc::now() })
            .await;

        let advanced = orchestrator.get(plan.id).await.unwrap();
        assert_eq!(advanced.current_phase_index, 1);
        assert_eq!(advanced.status, CampaignStatus::Running);
    }

    #[tokio::test]
    async fn completing_a_review_gated_phase_pauses_for_review() {
        let orchestrator = harness().await;
        let plan = orchestrator.plan("market sizing".to_string(), two_phase_plan()).await.unwrap();
        orchestrator.execute(plan.id).await.unwrap();

        // Drive the first (non-review) phase to completion so the campaign
        // is sitting on the review-gated second phase.
        let job = orchestrator.facade.list(None, Some(plan.id)).await.into_iter().next().unwrap();
        orchestrator
            .handle_engine_event(&EngineEvent::JobCompleted { job_id: job.id, at: Utc::now() })
            .await;
        let current = orchestrator.get(plan.id).await.unwrap();
        assert_eq!(current.current_phase_index, 1);

        let second_job = orchestrator
            .facade
            .list(None, Some(plan.id))
            .await
            .into_iter()
            .find(|j| j.id != job.id)
            .unwrap();
        orchestrator
            .handle_engine_event(&EngineEvent::JobCompleted { job_id: second_job.id, at: Utc::now() })
            .await;

        let awaiting = orchestrator.get(current.id).await.unwrap();
        assert_eq!(awaiting.status, CampaignStatus::AwaitingReview);
        assert_eq!(awaiting.current_phase_index, 1);
    }
}
