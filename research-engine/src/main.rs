use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use research_core::{
    wrap_idempotent, ArtifactStore, ConfigStore, CostGovernor, CostLedger, EngineFacade, EventBus,
    JobQueue, Poller, Router,
};
use research_orchestrator::{CampaignOrchestrator, CampaignStore};
use research_providers::{
    is_placeholder_api_key, Adapter, AnthropicAdapter, AzureAdapter, GeminiAdapter, GrokAdapter,
    OpenAiAdapter, ProviderRegistry,
};
use research_observability::{canonical_logs_dir_from_root, init_process_logging, ProcessKind};
use research_server::{serve, AppState, RuntimeState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "research-engine")]
#[command(about = "Headless multi-provider deep research engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
}

const LOG_RETENTION_DAYS: u64 = 14;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { hostname, port, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_guard, _log_info) =
                init_process_logging(ProcessKind::Engine, &logs_dir, LOG_RETENTION_DAYS)?;

            let attempt_id = uuid::Uuid::new_v4().to_string();
            let state = AppState::new_starting(attempt_id);
            state.set_phase("building runtime").await;

            match build_runtime(&state_dir).await {
                Ok(runtime) => {
                    spawn_background_loops(&runtime);
                    state.mark_ready(runtime)?;
                    state.finish_ready().await;
                }
                Err(err) => {
                    state.mark_failed("building runtime", err.to_string()).await;
                    return Err(err);
                }
            }

            let addr: SocketAddr =
                format!("{hostname}:{port}").parse().context("invalid hostname or port")?;
            info!("starting research-engine on http://{addr}");
            serve(addr, state).await?;
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("RESEARCH_ENGINE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".research-engine")
}

fn spawn_background_loops(runtime: &RuntimeState) {
    runtime.facade.clone().spawn_dispatch_loop();
    runtime.poller.clone().spawn(Duration::from_secs(5));
    runtime.campaigns.clone().spawn_event_loop();
}

async fn build_runtime(state_dir: &PathBuf) -> anyhow::Result<RuntimeState> {
    let config = Arc::new(ConfigStore::new(state_dir.join("config.json")).await?);
    let engine_config = config.get().await;

    let events = EventBus::new();
    let queue = Arc::new(JobQueue::open(state_dir.join("queue.db")).await?);
    let ledger = Arc::new(CostLedger::open(state_dir.join("ledger.db")).await?);
    let governor = Arc::new(CostGovernor::new(ledger.clone(), engine_config.budget.clone()));
    let router = Arc::new(Router::new(ProviderRegistry::new()));
    let artifacts = Arc::new(ArtifactStore::new(engine_config.artifact_root.clone()));
    let campaigns_store = Arc::new(CampaignStore::open(state_dir.join("campaigns.db")).await?);

    let adapters = build_adapters(&engine_config);

    let facade = Arc::new(EngineFacade::new(
        queue.clone(),
        router.clone(),
        governor.clone(),
        ledger.clone(),
        artifacts.clone(),
        events.clone(),
        config.clone(),
        adapters.clone(),
    ));

    let poller = Arc::new(Poller::new(
        "research-engine".to_string(),
        queue.clone(),
        router.clone(),
        governor.clone(),
        ledger.clone(),
        artifacts.clone(),
        events.clone(),
        adapters,
        engine_config.poll.clone(),
    ));

    let campaigns =
        Arc::new(CampaignOrchestrator::new(facade.clone(), artifacts.clone(), campaigns_store, events.clone()));

    Ok(RuntimeState { queue, router, governor, ledger, artifacts, config, events, facade, poller, campaigns })
}

/// Builds one adapter per recognized provider with a non-placeholder API key
/// configured; providers without credentials are simply absent from the map,
/// so the Router's fallback chain never selects them (no adapter -> job
/// fails fast rather than hanging on a bad request).
fn build_adapters(config: &research_core::EngineConfig) -> HashMap<String, Arc<dyn Adapter>> {
    let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();

    let credential = |provider: &str| config.providers.get(provider).cloned().unwrap_or_default();
    let has_key = |key: &Option<String>| key.as_deref().map(|k| !is_placeholder_api_key(k)).unwrap_or(false);

    let openai = credential("openai");
    if has_key(&openai.api_key) {
        adapters.insert(
            "openai".to_string(),
            wrap_idempotent(OpenAiAdapter::new(openai.api_key.unwrap(), openai.base_url)),
        );
    }

    let azure = credential("azure");
    if has_key(&azure.api_key) {
        if let Some(base_url) = azure.base_url {
            adapters.insert("azure".to_string(), wrap_idempotent(AzureAdapter::new(azure.api_key.unwrap(), base_url, None)));
        }
    }

    let gemini = credential("gemini");
    if has_key(&gemini.api_key) {
        adapters.insert(
            "gemini".to_string(),
            wrap_idempotent(GeminiAdapter::new(gemini.api_key.unwrap(), gemini.base_url)),
        );
    }

    let grok = credential("grok");
    if has_key(&grok.api_key) {
        adapters.insert("grok".to_string(), wrap_idempotent(GrokAdapter::new(grok.api_key.unwrap(), grok.base_url)));
    }

    let anthropic = credential("anthropic");
    if has_key(&anthropic.api_key) {
        adapters.insert(
            "anthropic".to_string(),
            wrap_idempotent(AnthropicAdapter::new(anthropic.api_key.unwrap(), anthropic.base_url)),
        );
    }

    adapters
}
