use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use research_types::{AttemptRecord, ErrorClass, Job, JobStatus, MAX_FALLBACK_ATTEMPTS};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

pub const QUEUE_SCHEMA_VERSION: u32 = 1;
const IDEMPOTENCY_WINDOW: Duration = Duration::minutes(5);
const DEFAULT_LEASE_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum QueueError {
    Conflict { job_id: Uuid },
    AmbiguousPrefix { prefix: String, count: usize },
    NotFound { prefix: String },
}

#[derive(Serialize, Deserialize)]
struct QueueFile {
    schema_version: u32,
    jobs: Vec<Job>,
}

/// Durable FIFO-with-priority queue and job state machine (C7). Persists to
/// a single JSON document; every mutating method flushes before returning so
/// a crash between mutation and flush never happens from the caller's
/// perspective.
pub struct JobQueue {
    path: PathBuf,
    jobs: RwLock<HashMap<Uuid, Job>>,
    pub completion_notify: Notify,
}

impl JobQueue {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jobs = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: QueueFile = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing queue file {}", path.display()))?;
                migrate(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e).context("reading queue file"),
        };
        Ok(JobQueue {
            path,
            jobs: RwLock::new(jobs),
            completion_notify: Notify::new(),
        })
    }

    async fn flush(&self, jobs: &HashMap<Uuid, Job>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let file = QueueFile {
            schema_version: QUEUE_SCHEMA_VERSION,
            jobs: jobs.values().cloned().collect(),
        };
        let body = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("writing queue file {}", self.path.display()))
    }

    /// Returns an existing job's id if `idempotency_key` was submitted within
    /// the last 5 minutes, so repeated submits resolve to one job.
    pub async fn find_by_idempotency_key(&self, key: &str) -> Option<Uuid> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;
        jobs.values()
            .find(|j| {
                j.idempotency_key.as_deref() == Some(key) && now - j.created_at <= IDEMPOTENCY_WINDOW
            })
            .map(|j| j.id)
    }

    pub async fn enqueue(&self, job: Job) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job.clone());
        self.flush(&jobs).await?;
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Resolves a full id or an unambiguous prefix; never silently picks the
    /// first match when a prefix is ambiguous.
    pub async fn resolve(&self, id_or_prefix: &str) -> Result<Job, QueueError> {
        let jobs = self.jobs.read().await;
        if let Ok(uuid) = Uuid::parse_str(id_or_prefix) {
            return jobs
                .get(&uuid)
                .cloned()
                .ok_or_else(|| QueueError::NotFound {
                    prefix: id_or_prefix.to_string(),
                });
        }
        let matches: Vec<&Job> = jobs
            .values()
            .filter(|j| j.id.simple().to_string().starts_with(id_or_prefix))
            .collect();
        match matches.len() {
            0 => Err(QueueError::NotFound {
                prefix: id_or_prefix.to_string(),
            }),
            1 => Ok(matches[0].clone()),
            count => Err(QueueError::AmbiguousPrefix {
                prefix: id_or_prefix.to_string(),
                count,
            }),
        }
    }

    /// Priority/created_at-ordered list of PENDING jobs (or jobs holding an
    /// expired lease, counted as eligible for redispatch).
    pub async fn list_pending(&self) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        pending
    }

    pub async fn list(&self, status: Option<JobStatus>, campaign: Option<Uuid>) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        jobs.values()
            .filter(|j| status.map(|s| j.status == s).unwrap_or(true))
            .filter(|j| campaign.map(|c| j.parent_campaign == Some(c)).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// PENDING -> PROCESSING: atomic under the map's write lock.
    pub async fn start_processing(
        &self,
        id: Uuid,
        provider: String,
        model: String,
        external_id: Option<String>,
    ) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound {
            prefix: id.to_string(),
        })?;
        if job.status != JobStatus::Pending {
            return Err(QueueError::Conflict { job_id: id });
        }
        job.status = JobStatus::Processing;
        job.chosen_provider = Some(provider.clone());
        job.chosen_model = Some(model.clone());
        job.external_id = external_id;
        job.submitted_at = Some(Utc::now());
        job.attempts += 1;
        job.attempt_log.push(AttemptRecord {
            provider,
            model,
            error_class: None,
            at: Utc::now(),
        });
        job.lease_owner = None;
        job.lease_expires_at = None;
        let result = job.clone();
        self.flush(&jobs).await.map_err(|_| QueueError::Conflict { job_id: id })?;
        Ok(result)
    }

    /// PROCESSING -> PENDING (fallback). Requires attempts < MAX_FALLBACK_ATTEMPTS
    /// and a retryable error class.
    pub async fn fallback_to_pending(&self, id: Uuid, error_class: ErrorClass) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound {
            prefix: id.to_string(),
        })?;
        if job.status != JobStatus::Processing {
            return Err(QueueError::Conflict { job_id: id });
        }
        if job.attempts >= MAX_FALLBACK_ATTEMPTS || error_class.is_fatal() {
            return Err(QueueError::Conflict { job_id: id });
        }
        if let Some(last) = job.attempt_log.last_mut() {
            last.error_class = Some(error_class);
        }
        job.status = JobStatus::Pending;
        job.chosen_provider = None;
        job.chosen_model = None;
        job.external_id = None;
        job.lease_owner = None;
        job.lease_expires_at = None;
        let result = job.clone();
        self.flush(&jobs).await.map_err(|_| QueueError::Conflict { job_id: id })?;
        Ok(result)
    }

    /// Records the provider's external job id once an asynchronous submit
    /// returns one; a no-op target for a job that already completed the
    /// round trip some other way.
    pub async fn set_external_id(&self, id: Uuid, external_id: String) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound {
            prefix: id.to_string(),
        })?;
        if job.status != JobStatus::Processing {
            return Err(QueueError::Conflict { job_id: id });
        }
        job.external_id = Some(external_id);
        let result = job.clone();
        self.flush(&jobs).await.map_err(|_| QueueError::Conflict { job_id: id })?;
        Ok(result)
    }

    pub async fn complete(&self, id: Uuid, cost_actual: research_types::Money) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound {
            prefix: id.to_string(),
        })?;
        if job.status != JobStatus::Processing {
            return Err(QueueError::Conflict { job_id: id });
        }
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.cost_actual = Some(cost_actual);
        let result = job.clone();
        self.flush(&jobs).await.map_err(|_| QueueError::Conflict { job_id: id })?;
        self.completion_notify.notify_waiters();
        Ok(result)
    }

    pub async fn fail(&self, id: Uuid, reason: String) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound {
            prefix: id.to_string(),
        })?;
        if job.status.is_terminal() {
            return Err(QueueError::Conflict { job_id: id });
        }
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.failure_reason = Some(reason);
        let result = job.clone();
        self.flush(&jobs).await.map_err(|_| QueueError::Conflict { job_id: id })?;
        self.completion_notify.notify_waiters();
        Ok(result)
    }

    /// Any -> CANCELED. Caller performs the best-effort provider cancel
    /// before invoking this; the transition happens regardless of its
    /// outcome.
    pub async fn cancel(&self, id: Uuid) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound {
            prefix: id.to_string(),
        })?;
        if job.status.is_terminal() {
            return Err(QueueError::Conflict { job_id: id });
        }
        job.status = JobStatus::Canceled;
        job.completed_at = Some(Utc::now());
        let result = job.clone();
        self.flush(&jobs).await.map_err(|_| QueueError::Conflict { job_id: id })?;
        self.completion_notify.notify_waiters();
        Ok(result)
    }

    /// Grants a poller lease over a PROCESSING job. Fails if the job already
    /// holds an unexpired lease from a different owner.
    pub async fn acquire_lease(&self, id: Uuid, owner: &str) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound {
            prefix: id.to_string(),
        })?;
        let now = Utc::now();
        let held_elsewhere = job
            .lease_expires_at
            .map(|exp| exp > now && job.lease_owner.as_deref() != Some(owner))
            .unwrap_or(false);
        if held_elsewhere {
            return Err(QueueError::Conflict { job_id: id });
        }
        job.lease_owner = Some(owner.to_string());
        job.lease_expires_at = Some(now + Duration::seconds(DEFAULT_LEASE_SECONDS));
        let result = job.clone();
        self.flush(&jobs).await.map_err(|_| QueueError::Conflict { job_id: id })?;
        Ok(result)
    }

    /// All PROCESSING jobs whose lease has expired (or never existed) and
    /// are therefore reclaimable by any poller, including after a crash.
    pub async fn processing_with_expired_lease(&self) -> Vec<Job> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;
        jobs.values()
            .filter(|j| {
                j.status == JobStatus::Processing
                    && j.lease_expires_at.map(|exp| exp <= now).unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub async fn count_processing(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count()
    }
}

fn migrate(file: QueueFile) -> HashMap<Uuid, Job> {
    // Only schema version 1 has ever existed; this chain is the place future
    // versions get an idempotent upgrade step before the queue accepts any
    // transition.
    match file.schema_version {
        QUEUE_SCHEMA_VERSION => file.jobs.into_iter().map(|j| (j.id, j)).collect(),
        other => {
            tracing::warn!(found = other, expected = QUEUE_SCHEMA_VERSION, "unknown queue schema version, loading as-is");
            file.jobs.into_iter().map(|j| (j.id, j)).collect()
        }
    }
}

pub fn is_retryable_after_fallback(error_class: ErrorClass) -> bool {
    matches!(
        error_class,
        ErrorClass::Transient | ErrorClass::RateLimit | ErrorClass::ProviderDown
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_types::{JobMode, ProviderChoice};
    use std::collections::HashMap as Map;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("research-engine-queue-test-{}.json", Uuid::new_v4()))
    }

    fn new_job() -> Job {
        Job::new(
            "test prompt".to_string(),
            JobMode::Focus,
            ProviderChoice::Auto,
            1,
            vec![],
            None,
            None,
            Map::new(),
        )
    }

    #[tokio::test]
    async fn pending_to_processing_to_completed_transitions_atomically() {
        let queue = JobQueue::open(temp_path()).await.unwrap();
        let job = queue.enqueue(new_job()).await.unwrap();

        let processing = queue
            .start_processing(job.id, "openai".into(), "gpt-4o".into(), Some("ext-1".into()))
            .await
            .unwrap();
        assert_eq!(processing.status, JobStatus::Processing);
        assert_eq!(processing.attempts, 1);

        let completed = queue
            .complete(job.id, research_types::Money::from_dollars(0.01))
            .await
            .unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert!(completed.completed_at.is_some());
    }

    #[tokio::test]
    async fn fallback_requires_attempts_under_the_cap() {
        let queue = JobQueue::open(temp_path()).await.unwrap();
        let job = queue.enqueue(new_job()).await.unwrap();
        queue
            .start_processing(job.id, "openai".into(), "gpt-4o".into(), None)
            .await
            .unwrap();
        let fell_back = queue
            .fallback_to_pending(job.id, ErrorClass::ProviderDown)
            .await
            .unwrap();
        assert_eq!(fell_back.status, JobStatus::Pending);
        assert_eq!(fell_back.attempts, 1);
    }

    #[tokio::test]
    async fn ambiguous_prefix_is_reported_explicitly() {
        let queue = JobQueue::open(temp_path()).await.unwrap();
        let mut a = new_job();
        a.id = Uuid::parse_str("aaaaaaaa-1111-1111-1111-111111111111").unwrap();
        let mut b = new_job();
        b.id = Uuid::parse_str("aaaaaaaa-2222-2222-2222-222222222222").unwrap();
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        let result = queue.resolve("aaaaaaaa").await;
        assert!(matches!(result, Err(QueueError::AmbiguousPrefix { count: 2, .. })));
    }

    #[tokio::test]
    async fn unambiguous_prefix_resolves_to_the_matching_job() {
        let queue = JobQueue::open(temp_path()).await.unwrap();
        let job = queue.enqueue(new_job()).await.unwrap();
        let prefix = &job.id.simple().to_string()[..8];
        let found = queue.resolve(prefix).await.unwrap();
        assert_eq!(found.id, job.id);
    }

    #[tokio::test]
    async fn completed_jobs_can_never_transition_again() {
        let queue = JobQueue::open(temp_path()).await.unwrap();
        let job = queue.enqueue(new_job()).await.unwrap();
        queue
            .start_processing(job.id, "openai".into(), "gpt-4o".into(), None)
            .await
            .unwrap();
        queue
            .complete(job.id, research_types::Money::ZERO)
            .await
            .unwrap();
        let retry = queue.fail(job.id, "late failure".into()).await;
        assert!(matches!(retry, Err(QueueError::Conflict { .. })));
    }
}
