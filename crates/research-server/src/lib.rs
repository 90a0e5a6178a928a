use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use research_core::{
    ArtifactStore, ConfigStore, CostGovernor, CostLedger, EngineFacade, EventBus, JobQueue, Poller, Router,
};
use research_orchestrator::CampaignOrchestrator;
use tokio::sync::RwLock;

mod http;
pub use http::serve;

/// Everything the engine needs once it's up: the queue, router, governor and
/// the facade/orchestrator/poller that sit on top of them. Built once in
/// `research-engine`'s `main.rs` and handed to `AppState::mark_ready`.
pub struct RuntimeState {
    pub queue: Arc<JobQueue>,
    pub router: Arc<Router>,
    pub governor: Arc<CostGovernor>,
    pub ledger: Arc<CostLedger>,
    pub artifacts: Arc<ArtifactStore>,
    pub config: Arc<ConfigStore>,
    pub events: EventBus,
    pub facade: Arc<EngineFacade>,
    pub poller: Arc<Poller>,
    pub campaigns: Arc<CampaignOrchestrator>,
}

#[derive(Debug, Clone)]
pub enum StartupStatus {
    Starting,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StartupState {
    pub status: StartupStatus,
    pub phase: String,
    pub started_at_ms: u64,
    pub attempt_id: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StartupSnapshot {
    pub status: StartupStatus,
    pub phase: String,
    pub started_at_ms: u64,
    pub attempt_id: String,
    pub last_error: Option<String>,
    pub elapsed_ms: u64,
}

/// Composition root handed to every axum handler. The runtime isn't available
/// until `mark_ready` is called; handlers hit during boot see a 503 via
/// `is_ready`/`Deref::deref`'s panic path is only reached after that check.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<OnceLock<RuntimeState>>,
    pub startup: Arc<RwLock<StartupState>>,
    pub api_token: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new_starting(attempt_id: String) -> Self {
        Self {
            runtime: Arc::new(OnceLock::new()),
            startup: Arc::new(RwLock::new(StartupState {
                status: StartupStatus::Starting,
                phase: "boot".to_string(),
                started_at_ms: now_ms(),
                attempt_id,
                last_error: None,
            })),
            api_token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.runtime.get().is_some()
    }

    pub async fn api_token(&self) -> Option<String> {
        self.api_token.read().await.clone()
    }

    pub async fn set_api_token(&self, token: Option<String>) {
        *self.api_token.write().await = token;
    }

    pub async fn startup_snapshot(&self) -> StartupSnapshot {
        let state = self.startup.read().await.clone();
        StartupSnapshot {
            elapsed_ms: now_ms().saturating_sub(state.started_at_ms),
            status: state.status,
            phase: state.phase,
            started_at_ms: state.started_at_ms,
            attempt_id: state.attempt_id,
            last_error: state.last_error,
        }
    }

    pub async fn set_phase(&self, phase: impl Into<String>) {
        let mut startup = self.startup.write().await;
        startup.phase = phase.into();
    }

    pub fn mark_ready(&self, runtime: RuntimeState) -> anyhow::Result<()> {
        self.runtime
            .set(runtime)
            .map_err(|_| anyhow::anyhow!("runtime already initialized"))?;
        Ok(())
    }

    pub async fn finish_ready(&self) {
        let mut startup = self.startup.write().await;
        startup.status = StartupStatus::Ready;
        startup.phase = "ready".to_string();
        startup.last_error = None;
    }

    pub async fn mark_failed(&self, phase: impl Into<String>, error: impl Into<String>) {
        let mut startup = self.startup.write().await;
        startup.status = StartupStatus::Failed;
        startup.phase = phase.into();
        startup.last_error = Some(error.into());
    }
}

impl Deref for AppState {
    type Target = RuntimeState;

    fn deref(&self) -> &Self::Target {
        self.runtime
            .get()
            .expect("runtime accessed before startup completion")
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
