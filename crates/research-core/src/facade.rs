use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use research_providers::{Adapter, IdempotentAdapter, SubmitRequest};
use research_types::{
    CostEntry, CostKind, EngineError, EngineEvent, Job, JobMode, JobStatus, ProviderChoice,
    ToolKind, MAX_FALLBACK_ATTEMPTS,
};
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use uuid::Uuid;

use crate::artifact_store::ArtifactStore;
use crate::config::ConfigStore;
use crate::event_bus::EventBus;
use crate::governor::{CostGovernor, GovernorDecision};
use crate::ledger::CostLedger;
use crate::queue::{JobQueue, QueueError};
use crate::router::{Candidate, RouteRequest, Router};

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Created(Job),
    AlreadySubmitted(Job),
    RequiresConfirmation { reason: String },
}

fn queue_error_to_engine(err: QueueError) -> EngineError {
    match err {
        QueueError::Conflict { job_id } => EngineError::QueueConflict { job_id: job_id.to_string() },
        QueueError::AmbiguousPrefix { prefix, count } => EngineError::AmbiguousPrefix { prefix, count },
        QueueError::NotFound { prefix } => EngineError::NotFound { prefix },
    }
}

/// The single composition root (C11): every other component is constructed
/// once at process startup and handed to this struct as an `Arc`. Nothing
/// downstream constructs its own instance of Queue, Router, Governor, Ledger,
/// ArtifactStore, EventBus, or ConfigStore.
pub struct EngineFacade {
    pub queue: Arc<JobQueue>,
    pub router: Arc<Router>,
    pub governor: Arc<CostGovernor>,
    pub ledger: Arc<CostLedger>,
    pub artifacts: Arc<ArtifactStore>,
    pub events: EventBus,
    pub config: Arc<ConfigStore>,
    adapters: HashMap<String, Arc<dyn Adapter>>,
    semaphores: RwLock<HashMap<String, Arc<Semaphore>>>,
    /// Serializes budget-check-then-enqueue across concurrent submissions so
    /// two near-simultaneous expensive submits can't both observe the same
    /// pre-submission budget and both get `Allow`.
    submit_lock: Mutex<()>,
}

impl EngineFacade {
    pub fn new(
        queue: Arc<JobQueue>,
        router: Arc<Router>,
        governor: Arc<CostGovernor>,
        ledger: Arc<CostLedger>,
        artifacts: Arc<ArtifactStore>,
        events: EventBus,
        config: Arc<ConfigStore>,
        adapters: HashMap<String, Arc<dyn Adapter>>,
    ) -> Self {
        EngineFacade {
            queue,
            router,
            governor,
            ledger,
            artifacts,
            events,
            config,
            adapters,
            semaphores: RwLock::new(HashMap::new()),
            submit_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        prompt: String,
        mode: JobMode,
        provider_choice: ProviderChoice,
        priority: u8,
        tools: Vec<ToolKind>,
        parent_campaign: Option<Uuid>,
        idempotency_key: Option<String>,
        metadata: HashMap<String, String>,
        interactive: bool,
    ) -> Result<SubmitOutcome, EngineError> {
        if let Some(key) = &idempotency_key {
            if let Some(existing_id) = self.queue.find_by_idempotency_key(key).await {
                if let Some(job) = self.queue.get(existing_id).await {
                    return Ok(SubmitOutcome::AlreadySubmitted(job));
                }
            }
        }

        let estimate = match &provider_choice {
            ProviderChoice::Explicit { model, .. } => self.router.estimate(model, prompt.len()),
            ProviderChoice::Auto => {
                let chain = self
                    .router
                    .select_chain(&RouteRequest { prompt: prompt.clone(), mode, tools: tools.clone() })
                    .await;
                match chain.first() {
                    Some(top) => self.router.estimate(&top.model, prompt.len()),
                    None => return Err(EngineError::NoProviderAvailable),
                }
            }
        };

        // Hold the submit lock across the check and the enqueue: without it,
        // two concurrent submits could both read the same pre-submission
        // ledger totals, both get `Allow`, and both enqueue over the cap.
        let _permit = self.submit_lock.lock().await;

        match self.governor.check_submit(estimate, interactive).await {
            GovernorDecision::Deny { reason: _ } => {
                return Err(EngineError::BudgetDenied { remaining: estimate });
            }
            GovernorDecision::RequireConfirm { reason } => {
                return Ok(SubmitOutcome::RequiresConfirmation { reason });
            }
            GovernorDecision::Allow => {}
        }

        let mut job = Job::new(
            prompt,
            mode,
            provider_choice,
            priority,
            tools,
            parent_campaign,
            idempotency_key,
            metadata,
        );
        job.cost_estimate = Some(estimate);
        let job = self.queue.enqueue(job).await.map_err(|e| EngineError::StateCorruption {
            message: e.to_string(),
        })?;
        drop(_permit);
        self.events.publish(EngineEvent::JobCreated { job_id: job.id, at: Utc::now() });
        Ok(SubmitOutcome::Created(job))
    }

    pub async fn get(&self, id_or_prefix: &str) -> Result<Job, EngineError> {
        self.queue.resolve(id_or_prefix).await.map_err(queue_error_to_engine)
    }

    pub async fn list(&self, status: Option<JobStatus>, campaign: Option<Uuid>) -> Vec<Job> {
        self.queue.list(status, campaign).await
    }

    pub async fn cancel(&self, id_or_prefix: &str) -> Result<Job, EngineError> {
        let job = self.queue.resolve(id_or_prefix).await.map_err(queue_error_to_engine)?;
        if let (Some(provider), Some(external_id)) = (&job.chosen_provider, &job.external_id) {
            if let Some(adapter) = self.adapters.get(provider) {
                adapter.cancel(external_id).await;
            }
        }
        let canceled = self.queue.cancel(job.id).await.map_err(queue_error_to_engine)?;
        self.events.publish(EngineEvent::JobCanceled { job_id: canceled.id, at: Utc::now() });
        Ok(canceled)
    }

    async fn semaphore_for(&self, provider: &str) -> Arc<Semaphore> {
        if let Some(existing) = self.semaphores.read().await.get(provider) {
            return existing.clone();
        }
        let permits = self
            .config
            .get()
            .await
            .providers
            .get(provider)
            .map(|c| c.rate_limit_concurrency)
            .unwrap_or(5);
        let mut map = self.semaphores.write().await;
        map.entry(provider.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(permits.max(1))))
            .clone()
    }

    /// Resolves the candidate order for a PENDING job: the caller's explicit
    /// choice if given, otherwise the Router's ranked fallback chain.
    async fn candidates_for(&self, job: &Job) -> Vec<Candidate> {
        match &job.provider_choice {
            ProviderChoice::Explicit { provider, model } => vec![Candidate {
                provider: provider.clone(),
                model: model.clone(),
                score: 0.0,
            }],
            ProviderChoice::Auto => {
                self.router
                    .select_chain(&RouteRequest {
                        prompt: job.prompt.clone(),
                        mode: job.mode,
                        tools: job.tools.clone(),
                    })
                    .await
            }
        }
    }

    /// Attempts to dispatch one PENDING job to the next untried candidate in
    /// its fallback chain, respecting each provider's concurrency semaphore.
    async fn try_dispatch(&self, job: Job) {
        let candidates = self.candidates_for(&job).await;
        let tried: std::collections::HashSet<&str> =
            job.attempt_log.iter().map(|a| a.provider.as_str()).collect();
        let Some(candidate) = candidates.into_iter().find(|c| !tried.contains(c.provider.as_str())) else {
            self.fail_job(&job, "no untried provider left in the fallback chain".to_string()).await;
            return;
        };

        let Some(adapter) = self.adapters.get(&candidate.provider).cloned() else {
            self.fail_job(&job, format!("no adapter registered for provider {}", candidate.provider))
                .await;
            return;
        };

        let semaphore = self.semaphore_for(&candidate.provider).await;
        let Ok(_permit) = semaphore.try_acquire() else {
            // Provider at capacity; leave PENDING, another tick will retry.
            return;
        };

        let started = self
            .queue
            .start_processing(job.id, candidate.provider.clone(), candidate.model.clone(), None)
            .await;
        let Ok(started) = started else {
            return;
        };

        let client_token = format!("{}:{}", started.id, started.attempts);
        let request = SubmitRequest {
            client_token,
            prompt: started.prompt.clone(),
            model: candidate.model.clone(),
            tools: started.tools.clone(),
        };

        match adapter.submit(&request).await {
            Ok(result) => {
                self.ledger
                    .append(CostEntry {
                        job_id: started.id,
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        kind: CostKind::Estimate,
                        amount: started.cost_estimate.unwrap_or(research_types::Money::ZERO),
                        tokens_in: 0,
                        tokens_out: 0,
                        occurred_at: Utc::now(),
                    })
                    .await;

                match result.synchronous_result {
                    Some(artifact) => {
                        let cost = self.router.realized_cost(&candidate.model, &artifact.token_usage);
                        self.ledger
                            .append(CostEntry {
                                job_id: started.id,
                                provider: candidate.provider.clone(),
                                model: candidate.model.clone(),
                                kind: CostKind::Realized,
                                amount: cost,
                                tokens_in: artifact.token_usage.input,
                                tokens_out: artifact.token_usage.output,
                                occurred_at: Utc::now(),
                            })
                            .await;

                        // As in the Poller's reaper: only persist the Artifact
                        // once the job has actually transitioned to COMPLETED,
                        // so a job canceled concurrently with a synchronous
                        // response never ends up with an orphaned artifact.
                        if self.queue.complete(started.id, cost).await.is_ok() {
                            if let Err(err) = self.artifacts.write(&started, &artifact).await {
                                tracing::error!(job = %started.short_id(), error = %err, "failed to persist artifact for a completed job");
                            }
                            self.events
                                .publish(EngineEvent::JobCompleted { job_id: started.id, at: Utc::now() });
                            self.router.record_result(&candidate.provider, started.mode, true, 0).await;
                            self.governor.note_success().await;
                        }
                    }
                    None => {
                        // Asynchronous job: stays PROCESSING with `external_id`
                        // set; the Poller owns it from here.
                        if let Some(external_id) = result.external_id {
                            let _ = self.queue.set_external_id(started.id, external_id).await;
                        }
                        let _ = self.queue.acquire_lease(started.id, "dispatch-worker").await;
                    }
                }
            }
            Err(err) => {
                let class = err.classify();
                tracing::warn!(job = %started.short_id(), provider = %candidate.provider, error = %err, "submit failed");
                self.router.record_result(&candidate.provider, started.mode, false, 0).await;
                if !class.is_fatal() && started.attempts < MAX_FALLBACK_ATTEMPTS {
                    let _ = self.queue.fallback_to_pending(started.id, class).await;
                    self.queue.completion_notify.notify_waiters();
                } else {
                    self.fail_job(&started, format!("submit failed: {err}")).await;
                }
            }
        }
    }

    async fn fail_job(&self, job: &Job, reason: String) {
        if self.queue.fail(job.id, reason.clone()).await.is_ok() {
            self.events.publish(EngineEvent::JobFailed { job_id: job.id, reason, at: Utc::now() });
        }
    }

    /// Drains the PENDING backlog, blocking (not spinning) on the Queue's
    /// completion notifier when there is nothing dispatchable right now.
    pub async fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            let pending = self.queue.list_pending().await;
            if pending.is_empty() {
                let notified = self.queue.completion_notify.notified();
                let _ = tokio::time::timeout(StdDuration::from_secs(5), notified).await;
                continue;
            }
            for job in pending {
                self.try_dispatch(job).await;
            }
            // Brief yield so a tight loop of all-at-capacity providers
            // doesn't spin the scheduler.
            tokio::time::sleep(StdDuration::from_millis(200)).await;
        }
    }

    pub fn spawn_dispatch_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run_dispatch_loop())
    }

}

pub fn wrap_idempotent<A: Adapter + 'static>(adapter: A) -> Arc<dyn Adapter> {
    Arc::new(IdempotentAdapter::new(adapter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use research_providers::{AdapterError, ProviderRegistry, SubmitResult};
    use research_types::{Artifact, TokenUsage};
    use std::path::PathBuf;
    use tokio::sync::Mutex;

    enum StubBehavior {
        Synchronous,
        Async,
        Fails,
    }

    struct StubAdapter {
        behavior: StubBehavior,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        fn provider_id(&self) -> &str {
            "openai"
        }

        async fn submit(&self, _request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
            *self.calls.lock().await += 1;
            match self.behavior {
                StubBehavior::Synchronous => Ok(SubmitResult {
                    external_id: None,
                    initial_status: research_providers::ProviderStatus::Succeeded,
                    synchronous_result: Some(Artifact {
                        job_id: Uuid::nil(),
                        markdown_body: "report".to_string(),
                        citations: vec![],
                        token_usage: TokenUsage { input: 10, output: 20, reasoning: 0 },
                        provider_raw: serde_json::json!({}),
                        created_at: Utc::now(),
                    }),
                }),
                StubBehavior::Async => Ok(SubmitResult {
                    external_id: Some("ext-1".to_string()),
                    initial_status: research_providers::ProviderStatus::Queued,
                    synchronous_result: None,
                }),
                StubBehavior::Fails => Err(AdapterError {
                    status: Some(401),
                    timed_out: false,
                    message: "unauthorized".to_string(),
                    raw: serde_json::json!({}),
                }),
            }
        }

        async fn status(&self, _external_id: &str) -> Result<research_providers::ProviderStatus, AdapterError> {
            unreachable!("facade never polls status")
        }

        async fn fetch(&self, _external_id: &str) -> Result<Artifact, AdapterError> {
            unreachable!("facade never fetches directly")
        }

        async fn cancel(&self, _external_id: &str) -> bool {
            true
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("research-engine-facade-test-{name}-{}", Uuid::new_v4()))
    }

    async fn harness(behavior: StubBehavior) -> (Arc<EngineFacade>, Arc<JobQueue>) {
        let queue = Arc::new(JobQueue::open(temp_path("queue.json")).await.unwrap());
        let router = Arc::new(Router::new(ProviderRegistry::new()));
        let ledger = Arc::new(CostLedger::open(temp_path("ledger.json")).await.unwrap());
        let governor =
            Arc::new(CostGovernor::new(ledger.clone(), crate::config::BudgetConfig::default()));
        let artifacts = Arc::new(ArtifactStore::new(temp_path("artifacts")));
        let events = EventBus::new();
        let config = Arc::new(ConfigStore::new(temp_path("config.json")).await.unwrap());

        let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert("openai".to_string(), Arc::new(StubAdapter { behavior, calls: Mutex::new(0) }));

        let facade = Arc::new(EngineFacade::new(
            queue.clone(),
            router,
            governor,
            ledger,
            artifacts,
            events,
            config,
            adapters,
        ));
        (facade, queue)
    }

    #[tokio::test]
    async fn resubmitting_the_same_idempotency_key_returns_the_existing_job() {
        let (facade, _queue) = harness(StubBehavior::Synchronous).await;
        let prompt = "hello".to_string();
        let provider_choice =
            ProviderChoice::Explicit { provider: "openai".to_string(), model: "gpt-4o".to_string() };
        let tools = vec![];

        let first = facade
            .submit(
                prompt.clone(),
                JobMode::Focus,
                provider_choice.clone(),
                3,
                tools.clone(),
                None,
                Some("key-1".to_string()),
                HashMap::new(),
                false,
            )
            .await
            .unwrap();
        let created = match first {
            SubmitOutcome::Created(job) => job,
            other => panic!("expected Created, got {other:?}"),
        };

        let second = facade
            .submit(
                prompt,
                JobMode::Focus,
                provider_choice,
                3,
                tools,
                None,
                Some("key-1".to_string()),
                HashMap::new(),
                false,
            )
            .await
            .unwrap();

        match second {
            SubmitOutcome::AlreadySubmitted(job) => assert_eq!(job.id, created.id),
            other => panic!("expected AlreadySubmitted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_over_the_per_op_cap_is_denied() {
        let (facade, _queue) = harness(StubBehavior::Synchronous).await;
        let huge_prompt = "x".repeat(5_000_000);

        let result = facade
            .submit(
                huge_prompt,
                JobMode::Focus,
                ProviderChoice::Explicit { provider: "openai".to_string(), model: "gpt-4o".to_string() },
                3,
                vec![],
                None,
                None,
                HashMap::new(),
                false,
            )
            .await;

        assert!(matches!(result, Err(EngineError::BudgetDenied { .. })));
    }

    #[tokio::test]
    async fn dispatch_completes_a_synchronous_job_inline() {
        let (facade, queue) = harness(StubBehavior::Synchronous).await;
        let outcome = facade
            .submit(
                "hello".to_string(),
                JobMode::Focus,
                ProviderChoice::Explicit { provider: "openai".to_string(), model: "gpt-4o".to_string() },
                3,
                vec![],
                None,
                None,
                HashMap::new(),
                false,
            )
            .await
            .unwrap();
        let job = match outcome {
            SubmitOutcome::Created(job) => job,
            other => panic!("expected Created, got {other:?}"),
        };

        facade.try_dispatch(job.clone()).await;

        let updated = queue.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Completed);
        assert!(updated.cost_actual.is_some());
    }

    #[tokio::test]
    async fn dispatch_leaves_an_async_job_processing_with_external_id() {
        let (facade, queue) = harness(StubBehavior::Async).await;
        let outcome = facade
            .submit(
                "hello".to_string(),
                JobMode::Focus,
                ProviderChoice::Explicit { provider: "openai".to_string(), model: "gpt-4o".to_string() },
                3,
                vec![],
                None,
                None,
                HashMap::new(),
                false,
            )
            .await
            .unwrap();
        let job = match outcome {
            SubmitOutcome::Created(job) => job,
            other => panic!("expected Created, got {other:?}"),
        };

        facade.try_dispatch(job.clone()).await;

        let updated = queue.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(updated.external_id.as_deref(), Some("ext-1"));
    }

    #[tokio::test]
    async fn dispatch_fails_the_job_on_a_fatal_provider_error() {
        let (facade, queue) = harness(StubBehavior::Fails).await;
        let outcome = facade
            .submit(
                "hello".to_string(),
                JobMode::Focus,
                ProviderChoice::Explicit { provider: "openai".to_string(), model: "gpt-4o".to_string() },
                3,
                vec![],
                None,
                None,
                HashMap::new(),
                false,
            )
            .await
            .unwrap();
        let job = match outcome {
            SubmitOutcome::Created(job) => job,
            other => panic!("expected Created, got {other:?}"),
        };

        facade.try_dispatch(job.clone()).await;

        let updated = queue.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn dispatch_fails_the_job_when_no_adapter_is_registered() {
        let (facade, queue) = harness(StubBehavior::Synchronous).await;
        let outcome = facade
            .submit(
                "hello".to_string(),
                JobMode::Focus,
                ProviderChoice::Explicit { provider: "azure".to_string(), model: "gpt-4o".to_string() },
                3,
                vec![],
                None,
                None,
                HashMap::new(),
                false,
            )
            .await
            .unwrap();
        let job = match outcome {
            SubmitOutcome::Created(job) => job,
            other => panic!("expected Created, got {other:?}"),
        };

        facade.try_dispatch(job.clone()).await;

        let updated = queue.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Failed);
    }
}
