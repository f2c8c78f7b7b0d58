//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use vcoin_core::amount::i128_string;
use vcoin_core::{
    simulate as simulate_prices, Allocation, FundingProgress, Investment, InvestmentId,
    InvestmentStatus, Price, Project, ProjectConfig, ProjectId, Resolution,
};

use crate::db::{self, ResolutionRecord};
use crate::errors::{Result, SettlementError};
use crate::events::EventRecord;
use crate::ledger;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InvestmentRequest {
    pub investor: String,
    #[serde(default, with = "i128_string")]
    pub amount_cash: i128,
    #[serde(default, with = "i128_string")]
    pub amount_token: i128,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub tx_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    pub prices: Vec<Price>,
}

#[derive(Serialize)]
pub struct ProjectResponse {
    #[serde(flatten)]
    pub project: Project,
    pub progress: FundingProgress,
}

#[derive(Serialize)]
pub struct InvestmentsResponse {
    pub project_id: ProjectId,
    pub count: usize,
    pub investments: Vec<Investment>,
}

#[derive(Serialize)]
pub struct SettledResponse {
    pub investment: Investment,
    pub project: Project,
}

#[derive(Serialize)]
pub struct SimulationPointResponse {
    pub closing_price: Price,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
}

#[derive(Serialize)]
pub struct SimulationResponse {
    pub project_id: ProjectId,
    pub points: Vec<SimulationPointResponse>,
}

#[derive(Serialize)]
pub struct AllocationsResponse {
    pub resolution: ResolutionRecord,
    pub count: usize,
    pub allocations: Vec<Allocation>,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub project_id: ProjectId,
    pub count: usize,
    pub events: Vec<EventRecord>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ─────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", post(create_project))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/cancel", post(cancel_project))
        .route(
            "/projects/:id/investments",
            post(record_investment).get(list_investments),
        )
        .route("/projects/:id/simulate", post(simulate))
        .route("/projects/:id/allocations", get(get_allocations))
        .route("/projects/:id/events", get(get_project_events))
        .route("/investments/:id/complete", post(complete_investment))
        .route("/investments/:id/fail", post(fail_investment))
        .route("/investments/:id/reverse", post(reverse_investment))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    Json(config): Json<ProjectConfig>,
) -> Result<(StatusCode, Json<Project>)> {
    let project = ledger::create_project(&state.pool, config, ledger::now()).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /projects/:id`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<ProjectResponse>> {
    let project = db::get_project(&state.pool, project_id).await?;
    let progress = project.funding_progress()?;
    Ok(Json(ProjectResponse { project, progress }))
}

/// `POST /projects/:id/cancel`
pub async fn cancel_project(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<Project>> {
    let project = ledger::cancel_project(&state.pool, project_id, ledger::now()).await?;
    Ok(Json(project))
}

/// `POST /projects/:id/investments`
///
/// Records a pending investment; it counts towards the goals once completed.
pub async fn record_investment(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
    Json(req): Json<InvestmentRequest>,
) -> Result<(StatusCode, Json<Investment>)> {
    let investment = ledger::record_investment(
        &state.pool,
        project_id,
        req.investor,
        req.amount_cash,
        req.amount_token,
        ledger::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(investment)))
}

/// `GET /projects/:id/investments`
pub async fn list_investments(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<InvestmentsResponse>> {
    db::get_project(&state.pool, project_id).await?;
    let investments = db::list_investments(&state.pool, project_id).await?;
    Ok(Json(InvestmentsResponse {
        project_id,
        count: investments.len(),
        investments,
    }))
}

/// `POST /projects/:id/simulate`
///
/// Previews the resolution at each candidate closing price over the
/// investments settled so far. Per-price failures are reported inline.
pub async fn simulate(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
    Json(req): Json<SimulateRequest>,
) -> Result<Json<SimulationResponse>> {
    let project = db::get_project(&state.pool, project_id).await?;
    let settled: Vec<Investment> = db::list_investments(&state.pool, project_id)
        .await?
        .into_iter()
        .filter(|i| i.status != InvestmentStatus::Pending)
        .collect();

    let points = simulate_prices(&project, &settled, &req.prices)
        .into_iter()
        .map(|point| match point.result {
            Ok(resolution) => SimulationPointResponse {
                closing_price: point.closing_price,
                resolution: Some(resolution),
                error: None,
                code: None,
            },
            Err(e) => SimulationPointResponse {
                closing_price: point.closing_price,
                resolution: None,
                code: Some(e.code()),
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(SimulationResponse { project_id, points }))
}

/// `GET /projects/:id/allocations`
pub async fn get_allocations(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<AllocationsResponse>> {
    db::get_project(&state.pool, project_id).await?;
    let resolution = db::get_resolution(&state.pool, project_id)
        .await?
        .ok_or_else(|| SettlementError::NotFound(format!("resolution for project {project_id}")))?;
    let allocations = db::list_allocations(&state.pool, project_id).await?;
    Ok(Json(AllocationsResponse {
        resolution,
        count: allocations.len(),
        allocations,
    }))
}

/// `GET /projects/:id/events`
///
/// Returns the audit trail of the given project, oldest first.
pub async fn get_project_events(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<EventsResponse>> {
    let events = db::get_events_for_project(&state.pool, project_id).await?;
    Ok(Json(EventsResponse {
        project_id,
        count: events.len(),
        events,
    }))
}

/// `POST /investments/:id/complete`
///
/// The body is optional; a callback without a `tx_ref` may post nothing.
pub async fn complete_investment(
    State(state): State<Arc<ApiState>>,
    Path(investment_id): Path<InvestmentId>,
    req: Option<Json<CompleteRequest>>,
) -> Result<Json<SettledResponse>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let (investment, project) =
        ledger::complete_investment(&state.pool, investment_id, req.tx_ref, ledger::now()).await?;
    Ok(Json(SettledResponse {
        investment,
        project,
    }))
}

/// `POST /investments/:id/fail`
pub async fn fail_investment(
    State(state): State<Arc<ApiState>>,
    Path(investment_id): Path<InvestmentId>,
) -> Result<Json<Investment>> {
    let investment = ledger::fail_investment(&state.pool, investment_id, ledger::now()).await?;
    Ok(Json(investment))
}

/// `POST /investments/:id/reverse`
///
/// Appends a compensating record; the original stays untouched.
pub async fn reverse_investment(
    State(state): State<Arc<ApiState>>,
    Path(investment_id): Path<InvestmentId>,
) -> Result<(StatusCode, Json<SettledResponse>)> {
    let (investment, project) =
        ledger::reverse_investment(&state.pool, investment_id, ledger::now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(SettledResponse {
            investment,
            project,
        }),
    ))
}
