use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use research_providers::{Adapter, ProviderStatus};
use research_types::{CostEntry, CostKind, EngineEvent, ErrorClass, Job, JobStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::artifact_store::ArtifactStore;
use crate::config::PollConfig;
use crate::event_bus::EventBus;
use crate::governor::CostGovernor;
use crate::ledger::CostLedger;
use crate::queue::{is_retryable_after_fallback, JobQueue};
use crate::router::Router;

/// Hard ceiling on an async job's total provider runtime; past this the
/// Poller fails the job with reason `timeout` regardless of provider status.
const DEFAULT_MAX_PROVIDER_RUNTIME: ChronoDuration = ChronoDuration::hours(2);

/// Background reaper for asynchronous provider jobs (C8). Owns no job state
/// directly; every transition goes through the Queue so a crash mid-poll
/// leaves nothing half-applied from any other component's point of view.
pub struct Poller {
    owner_id: String,
    queue: Arc<JobQueue>,
    router: Arc<Router>,
    governor: Arc<CostGovernor>,
    ledger: Arc<CostLedger>,
    artifacts: Arc<ArtifactStore>,
    events: EventBus,
    adapters: HashMap<String, Arc<dyn Adapter>>,
    poll_config: PollConfig,
    next_poll_due: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl Poller {
    pub fn new(
        owner_id: String,
        queue: Arc<JobQueue>,
        router: Arc<Router>,
        governor: Arc<CostGovernor>,
        ledger: Arc<CostLedger>,
        artifacts: Arc<ArtifactStore>,
        events: EventBus,
        adapters: HashMap<String, Arc<dyn Adapter>>,
        poll_config: PollConfig,
    ) -> Self {
        Poller {
            owner_id,
            queue,
            router,
            governor,
            ledger,
            artifacts,
            events,
            adapters,
            poll_config,
            next_poll_due: RwLock::new(HashMap::new()),
        }
    }

    /// Adaptive cadence: tight polling just after submit, backing off as the
    /// job ages, capped at 60s regardless of configuration.
    fn poll_interval_for(&self, age: ChronoDuration) -> ChronoDuration {
        let seconds = if age < ChronoDuration::seconds(60) {
            self.poll_config.initial_s
        } else if age < ChronoDuration::minutes(5) {
            self.poll_config.mid_s
        } else {
            self.poll_config.late_s
        };
        ChronoDuration::seconds(seconds.min(60) as i64)
    }

    /// One reaping pass: reclaims abandoned leases, then polls every job this
    /// poller currently owns and whose adaptive interval has elapsed.
    pub async fn tick(&self) {
        for job in self.queue.processing_with_expired_lease().await {
            if self.queue.acquire_lease(job.id, &self.owner_id).await.is_err() {
                continue;
            }
        }

        let now = Utc::now();
        let owned: Vec<Job> = self
            .queue
            .list(Some(JobStatus::Processing), None)
            .await
            .into_iter()
            .filter(|j| j.lease_owner.as_deref() == Some(self.owner_id.as_str()))
            .collect();

        for job in owned {
            let due = {
                let map = self.next_poll_due.read().await;
                map.get(&job.id).copied().unwrap_or(now)
            };
            if due > now {
                continue;
            }
            self.poll_job(job).await;
        }
    }

    async fn poll_job(&self, job: Job) {
        let Some(submitted_at) = job.submitted_at else {
            return;
        };
        let age = Utc::now() - submitted_at;
        if age > DEFAULT_MAX_PROVIDER_RUNTIME {
            self.fail(&job, "timeout".to_string()).await;
            return;
        }

        let Some(external_id) = job.external_id.clone() else {
            // Synchronous submissions are completed inline by the caller and
            // never enter PROCESSING with a lease; nothing to poll here.
            return;
        };
        let Some(provider) = job.chosen_provider.clone() else {
            return;
        };
        let Some(adapter) = self.adapters.get(&provider).cloned() else {
            tracing::warn!(provider = %provider, "no adapter registered, failing job");
            self.fail(&job, format!("no adapter registered for provider {provider}")).await;
            return;
        };

        match adapter.status(&external_id).await {
            Ok(ProviderStatus::Queued) | Ok(ProviderStatus::Running) => {
                self.schedule_next(job.id, age).await;
                let _ = self.queue.acquire_lease(job.id, &self.owner_id).await;
            }
            Ok(ProviderStatus::Succeeded) => self.reap_success(&job, adapter.as_ref(), &external_id).await,
            Ok(ProviderStatus::Failed) => {
                self.reap_failure(&job, &provider, ErrorClass::ProviderDown).await
            }
            Ok(ProviderStatus::Canceled) => {
                let _ = self.queue.cancel(job.id).await;
            }
            Err(err) => {
                let class = err.classify();
                tracing::warn!(job = %job.short_id(), error = %err, "status poll failed");
                self.reap_failure(&job, &provider, class).await;
            }
        }
    }

    async fn schedule_next(&self, job_id: Uuid, age: ChronoDuration) {
        let interval = self.poll_interval_for(age);
        self.next_poll_due
            .write()
            .await
            .insert(job_id, Utc::now() + interval);
    }

    async fn reap_success(&self, job: &Job, adapter: &dyn Adapter, external_id: &str) {
        let artifact = match adapter.fetch(external_id).await {
            Ok(artifact) => artifact,
            Err(err) => {
                tracing::warn!(job = %job.short_id(), error = %err, "fetch after SUCCEEDED failed");
                self.reap_failure(job, job.chosen_provider.as_deref().unwrap_or(""), err.classify())
                    .await;
                return;
            }
        };

        let model = job.chosen_model.clone().unwrap_or_default();
        let provider = job.chosen_provider.clone().unwrap_or_default();
        let cost = self.router.realized_cost(&model, &artifact.token_usage);

        self.ledger
            .append(CostEntry {
                job_id: job.id,
                provider: provider.clone(),
                model,
                kind: CostKind::Realized,
                amount: cost,
                tokens_in: artifact.token_usage.input,
                tokens_out: artifact.token_usage.output,
                occurred_at: Utc::now(),
            })
            .await;

        // Only persist the Artifact once the job has actually transitioned to
        // COMPLETED: a job canceled out from under a pending fetch must never
        // end up with an orphaned artifact file on disk.
        if self.queue.complete(job.id, cost).await.is_err() {
            return;
        }

        if let Err(err) = self.artifacts.write(job, &artifact).await {
            tracing::error!(job = %job.short_id(), error = %err, "failed to persist artifact for a completed job");
        }

        self.next_poll_due.write().await.remove(&job.id);
        self.events.publish(EngineEvent::JobCompleted { job_id: job.id, at: Utc::now() });
        let latency_ms = job
            .submitted_at
            .map(|s| (Utc::now() - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self.router.record_result(&provider, job.mode, true, latency_ms).await;
        self.governor.note_success().await;
    }

    async fn reap_failure(&self, job: &Job, provider: &str, class: ErrorClass) {
        let disabled = self.router.record_result(provider, job.mode, false, 0).await;
        if disabled {
            self.events.publish(EngineEvent::ProviderAutoDisabled {
                provider: provider.to_string(),
                until: Utc::now() + ChronoDuration::hours(1),
                at: Utc::now(),
            });
        }
        let health = self.router.health_snapshot(provider).await;
        self.governor.circuit_breaker_trip(health.consecutive_failures).await;

        if is_retryable_after_fallback(class) && self.queue.fallback_to_pending(job.id, class).await.is_ok()
        {
            self.next_poll_due.write().await.remove(&job.id);
            self.queue.completion_notify.notify_waiters();
            return;
        }
        self.fail(job, format!("provider reported failure: {class:?}")).await;
    }

    async fn fail(&self, job: &Job, reason: String) {
        if self.queue.fail(job.id, reason.clone()).await.is_ok() {
            self.next_poll_due.write().await.remove(&job.id);
            self.events
                .publish(EngineEvent::JobFailed { job_id: job.id, reason, at: Utc::now() });
        }
    }

    /// Spawns the reaping loop at a fixed scheduler tick; the adaptive poll
    /// cadence is enforced per-job inside `tick`, not by this interval.
    pub fn spawn(self: Arc<Self>, scheduler_tick: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.tick().await;
                tokio::time::sleep(scheduler_tick).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BudgetConfig;
    use async_trait::async_trait;
    use research_providers::{AdapterError, ProviderRegistry, SubmitRequest, SubmitResult};
    use research_types::{Artifact, JobMode, ProviderChoice, TokenUsage};
    use std::collections::HashMap as Map;
    use std::path::PathBuf;

    struct StubAdapter {
        status_sequence: RwLock<Vec<ProviderStatus>>,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        fn provider_id(&self) -> &str {
            "openai"
        }

        async fn submit(&self, _request: &SubmitRequest) -> Result<SubmitResult, AdapterError> {
            unreachable!("poller never submits")
        }

        async fn status(&self, _external_id: &str) -> Result<ProviderStatus, AdapterError> {
            let mut seq = self.status_sequence.write().await;
            if seq.len() > 1 {
                Ok(seq.remove(0))
            } else {
                Ok(seq[0])
            }
        }

        async fn fetch(&self, _external_id: &str) -> Result<Artifact, AdapterError> {
            Ok(Artifact {
                job_id: Uuid::nil(),
                markdown_body: "report body".to_string(),
                citations: vec![],
                token_usage: TokenUsage { input: 100, output: 200, reasoning: 0 },
                provider_raw: serde_json::json!({}),
                created_at: Utc::now(),
            })
        }

        async fn cancel(&self, _external_id: &str) -> bool {
            true
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("research-engine-poller-test-{name}-{}", Uuid::new_v4()))
    }

    async fn harness(status: ProviderStatus) -> (Poller, Arc<JobQueue>, Job) {
        let queue = Arc::new(JobQueue::open(temp_path("queue.json")).await.unwrap());
        let mut job = Job::new(
            "test prompt".to_string(),
            JobMode::Focus,
            ProviderChoice::Auto,
            1,
            vec![],
            None,
            None,
            Map::new(),
        );
        job = queue.enqueue(job).await.unwrap();
        job = queue
            .start_processing(job.id, "openai".into(), "gpt-4o".into(), Some("ext-1".into()))
            .await
            .unwrap();
        queue.acquire_lease(job.id, "test-owner").await.unwrap();

        let router = Arc::new(Router::new(ProviderRegistry::new()));
        let ledger = Arc::new(CostLedger::open(temp_path("ledger.json")).await.unwrap());
        let governor = Arc::new(CostGovernor::new(ledger.clone(), BudgetConfig::default()));
        let artifacts = Arc::new(ArtifactStore::new(temp_path("artifacts")));
        let events = EventBus::new();

        let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert(
            "openai".to_string(),
            Arc::new(StubAdapter {
                status_sequence: RwLock::new(vec![status]),
            }),
        );

        let poller = Poller::new(
            "test-owner".to_string(),
            queue.clone(),
            router,
            governor,
            ledger,
            artifacts,
            events,
            adapters,
            PollConfig::default(),
        );
        (poller, queue, job)
    }

    #[tokio::test]
    async fn succeeded_status_writes_the_artifact_and_completes_the_job() {
        let (poller, queue, job) = harness(ProviderStatus::Succeeded).await;
        poller.tick().await;
        let updated = queue.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Completed);
        assert!(updated.cost_actual.is_some());
    }

    #[tokio::test]
    async fn failed_status_falls_back_to_pending_under_the_attempt_cap() {
        let (poller, queue, job) = harness(ProviderStatus::Failed).await;
        poller.tick().await;
        let updated = queue.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Pending);
    }
}
