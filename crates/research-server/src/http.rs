use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use research_types::{BudgetPeriod, EngineError, JobMode, JobStatus, PhaseSpec};
use research_wire::{
    CampaignRequestWire, CampaignView, CostSummaryWire, ErrorWire, HealthWire, JobListQuery,
    JobRequestWire, JobView,
};
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::AppState;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/events", get(events))
        .route("/campaigns", post(create_campaign).get(list_campaigns))
        .route("/campaigns/{id}", get(get_campaign))
        .route("/campaigns/{id}/execute", post(execute_campaign))
        .route("/campaigns/{id}/pause", post(pause_campaign))
        .route("/campaigns/{id}/resume", post(resume_campaign))
        .route("/cost/summary", get(cost_summary))
        .route("/config", get(get_config).patch(patch_config))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthWire> {
    if !state.is_ready() {
        return Json(HealthWire { ready: false, pending_jobs: 0, processing_jobs: 0, active_campaigns: 0 });
    }
    let jobs = state.queue.list(None, None).await;
    let pending_jobs = jobs.iter().filter(|j| j.status == JobStatus::Pending).count();
    let processing_jobs = jobs.iter().filter(|j| j.status == JobStatus::Processing).count();
    let active_campaigns = state
        .campaigns
        .list()
        .await
        .iter()
        .filter(|c| !matches!(c.status, research_types::CampaignStatus::Completed | research_types::CampaignStatus::Failed))
        .count();
    Json(HealthWire { ready: true, pending_jobs, processing_jobs, active_campaigns })
}

async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<JobRequestWire>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let provider_choice = input.provider_choice();
    let outcome = state
        .facade
        .submit(
            input.prompt,
            input.mode.unwrap_or(JobMode::Focus),
            provider_choice,
            input.priority.unwrap_or(3),
            input.tools,
            input.parent_campaign,
            input.idempotency_key,
            input.metadata,
            false,
        )
        .await?;

    match outcome {
        research_core::SubmitOutcome::Created(job) => Ok((StatusCode::CREATED, Json(JobView::from(&job)))),
        research_core::SubmitOutcome::AlreadySubmitted(job) => Ok((StatusCode::OK, Json(JobView::from(&job)))),
        research_core::SubmitOutcome::RequiresConfirmation { reason } => Err(ApiError {
            status: StatusCode::PRECONDITION_REQUIRED,
            body: json!({ "requires_confirmation": true, "reason": reason }),
        }),
    }
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobView>, ApiError> {
    let job = state.facade.get(&id).await?;
    Ok(Json(JobView::from(&job)))
}

async fn list_jobs(State(state): State<AppState>, Query(query): Query<JobListQuery>) -> Json<Vec<JobView>> {
    let jobs = state.facade.list(query.status, query.campaign).await;
    Json(jobs.iter().map(JobView::from).collect())
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobView>, ApiError> {
    let job = state.facade.cancel(&id).await?;
    Ok(Json(JobView::from(&job)))
}

async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.facade.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|item| item.ok())
        .map(|event| Ok(Event::default().json_data(&event).unwrap_or_else(|_| Event::default())));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(input): Json<CampaignRequestWire>,
) -> Result<(StatusCode, Json<CampaignView>), ApiError> {
    let phases: Vec<PhaseSpec> = input
        .phases
        .into_iter()
        .map(|p| PhaseSpec {
            title: p.title,
            prompt_template: p.prompt_template,
            depends_on_context_from_prior_phases: p.depends_on_context_from_prior_phases,
            review_required: p.review_required,
        })
        .collect();
    let plan = state.campaigns.plan(input.scenario, phases).await.map_err(ApiError::bad_request)?;
    Ok((StatusCode::CREATED, Json(CampaignView::from(&plan))))
}

async fn list_campaigns(State(state): State<AppState>) -> Json<Vec<CampaignView>> {
    let plans = state.campaigns.list().await;
    Json(plans.iter().map(CampaignView::from).collect())
}

async fn get_campaign(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CampaignView>, ApiError> {
    state
        .campaigns
        .get(id)
        .await
        .map(|plan| Json(CampaignView::from(&plan)))
        .ok_or_else(|| ApiError::not_found(id))
}

async fn execute_campaign(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CampaignView>, ApiError> {
    let plan = state.campaigns.execute(id).await.map_err(ApiError::bad_request)?;
    Ok(Json(CampaignView::from(&plan)))
}

#[derive(Debug, serde::Deserialize, Default)]
struct PauseCampaignInput {
    #[serde(default)]
    reason: Option<String>,
}

async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<PauseCampaignInput>>,
) -> Result<Json<CampaignView>, ApiError> {
    let reason = body.and_then(|b| b.0.reason).unwrap_or_else(|| "paused via API".to_string());
    let plan = state.campaigns.pause(id, reason).await.map_err(ApiError::bad_request)?;
    Ok(Json(CampaignView::from(&plan)))
}

async fn resume_campaign(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CampaignView>, ApiError> {
    let plan = state.campaigns.resume(id).await.map_err(ApiError::bad_request)?;
    Ok(Json(CampaignView::from(&plan)))
}

async fn cost_summary(State(state): State<AppState>) -> Json<serde_json::Map<String, Value>> {
    let now = chrono::Utc::now();
    let cfg = state.config.get().await;
    let mut out = serde_json::Map::new();
    out.insert(
        "day".to_string(),
        serde_json::to_value(CostSummaryWire {
            period: "day".to_string(),
            estimate_total: state.ledger.sum_estimate_for_period(BudgetPeriod::Day, now).await,
            realized_total: state.ledger.sum_for_period(BudgetPeriod::Day, now).await,
            cap: research_types::Money::from_dollars(cfg.budget.per_day),
        })
        .unwrap_or_else(|_| json!({})),
    );
    out.insert(
        "month".to_string(),
        serde_json::to_value(CostSummaryWire {
            period: "month".to_string(),
            estimate_total: state.ledger.sum_estimate_for_period(BudgetPeriod::Month, now).await,
            realized_total: state.ledger.sum_for_period(BudgetPeriod::Month, now).await,
            cap: research_types::Money::from_dollars(cfg.budget.per_month),
        })
        .unwrap_or_else(|_| json!({})),
    );
    Json(out)
}

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.config.get().await).unwrap_or_else(|_| json!({})))
}

async fn patch_config(State(state): State<AppState>, Json(patch): Json<Value>) -> Result<Json<Value>, ApiError> {
    let cfg = state.config.patch_runtime(patch).await.map_err(ApiError::internal)?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_else(|_| json!({}))))
}

/// Wraps any error surfaced to an HTTP handler, carrying the status code the
/// error maps to so `IntoResponse` doesn't need to re-derive it.
struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, body: json!({ "error": message }) }
    }

    fn internal(error: anyhow::Error) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, body: json!({ "error": error.to_string() }) }
    }

    fn not_found(id: Uuid) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, body: json!({ "error": format!("no campaign matches id {id}") }) }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError { status, body: serde_json::to_value(ErrorWire::from(&err)).unwrap_or_else(|_| json!({})) }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use research_core::{ArtifactStore, ConfigStore, CostGovernor, CostLedger, EngineFacade, EventBus, JobQueue, Poller, Router};
    use research_orchestrator::{CampaignOrchestrator, CampaignStore};
    use research_providers::ProviderRegistry;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("research-engine-http-test-{name}-{}", Uuid::new_v4()))
    }

    async fn test_state() -> AppState {
        let queue = std::sync::Arc::new(JobQueue::open(temp_path("queue.json")).await.unwrap());
        let router = std::sync::Arc::new(Router::new(ProviderRegistry::new()));
        let ledger = std::sync::Arc::new(CostLedger::open(temp_path("ledger.json")).await.unwrap());
        let governor = std::sync::Arc::new(CostGovernor::new(
            ledger.clone(),
            research_core::EngineConfig::default().budget,
        ));
        let artifacts = std::sync::Arc::new(ArtifactStore::new(temp_path("artifacts")));
        let events = EventBus::new();
        let config = std::sync::Arc::new(ConfigStore::new(temp_path("config.json")).await.unwrap());
        let adapters = HashMap::new();

        let facade = std::sync::Arc::new(EngineFacade::new(
            queue.clone(),
            router.clone(),
            governor.clone(),
            ledger.clone(),
            artifacts.clone(),
            events.clone(),
            config.clone(),
            adapters,
        ));
        let poller = std::sync::Arc::new(Poller::new(
            "test".to_string(),
            queue.clone(),
            router.clone(),
            governor.clone(),
            ledger.clone(),
            artifacts.clone(),
            events.clone(),
            HashMap::new(),
            research_core::EngineConfig::default().poll,
        ));
        let store = std::sync::Arc::new(CampaignStore::open(temp_path("campaigns.json")).await.unwrap());
        let campaigns = std::sync::Arc::new(CampaignOrchestrator::new(
            facade.clone(),
            artifacts.clone(),
            store,
            events.clone(),
        ));

        let state = AppState::new_starting("test-attempt".to_string());
        state
            .mark_ready(crate::RuntimeState {
                queue,
                router,
                governor,
                ledger,
                artifacts,
                config,
                events,
                facade,
                poller,
                campaigns,
            })
            .unwrap();
        state.finish_ready().await;
        state
    }

    #[tokio::test]
    async fn health_reports_ready_once_the_runtime_is_up() {
        let state = test_state().await;
        let response = app_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn submitting_a_job_returns_it_and_it_is_then_gettable() {
        let state = test_state().await;
        let app = app_router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/jobs")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "prompt": "survey the market", "provider": "openai", "model": "gpt-4o" }).to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: Value = serde_json::from_slice(&bytes).unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(Request::builder().uri(format!("/jobs/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn getting_an_unknown_job_returns_not_found() {
        let state = test_state().await;
        let response = app_router(state)
            .oneshot(Request::builder().uri(format!("/jobs/{}", Uuid::new_v4())).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cost_summary_reports_estimate_and_realized_totals_separately() {
        let state = test_state().await;
        state
            .ledger
            .append(research_types::CostEntry {
                job_id: Uuid::new_v4(),
                provider: "openai".into(),
                model: "gpt-4o".into(),
                kind: research_types::CostKind::Estimate,
                amount: research_types::Money::from_dollars(3.0),
                tokens_in: 10,
                tokens_out: 10,
                occurred_at: chrono::Utc::now(),
            })
            .await;
        state
            .ledger
            .append(research_types::CostEntry {
                job_id: Uuid::new_v4(),
                provider: "openai".into(),
                model: "gpt-4o".into(),
                kind: research_types::CostKind::Realized,
                amount: research_types::Money::from_dollars(1.0),
                tokens_in: 10,
                tokens_out: 10,
                occurred_at: chrono::Utc::now(),
            })
            .await;

        let response = app_router(state)
            .oneshot(Request::builder().uri("/cost/summary").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["day"]["estimate_total"], json!(3_000_000_i64));
        assert_eq!(body["day"]["realized_total"], json!(1_000_000_i64));
    }

    #[tokio::test]
    async fn creating_a_campaign_with_no_phases_is_rejected() {
        let state = test_state().await;
        let request = Request::builder()
            .method("POST")
            .uri("/campaigns")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "scenario": "empty", "phases": [] }).to_string()))
            .unwrap();
        let response = app_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
