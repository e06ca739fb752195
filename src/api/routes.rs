//! API Routes
//!
//! HTTP endpoint definitions. Every handler is a thin call into
//! `FinanceService`; errors carry the request's correlation id.

use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::domain::{CreatorEarningsMonthly, OperationContext, PlatformFinanceMonthly};
use crate::error::{ApiError, AppError};
use crate::reconcile::DetectionReport;
use crate::service::{FinanceService, UserFinancialSummary};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FinanceService>,
}

impl AppState {
    pub fn new(service: Arc<FinanceService>) -> Self {
        Self { service }
    }
}

// =========================================================================
// Request types
// =========================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
}

// =========================================================================
// API Router
// =========================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/earnings/:user_id/:year/:month", post(aggregate_month))
        .route("/platform/:year/:month", post(aggregate_platform_month))
        .route("/anomalies/detect", post(detect_anomalies))
        .route("/users/:user_id/summary", get(get_summary))
}

// =========================================================================
// POST /earnings/:user_id/:year/:month
// =========================================================================

async fn aggregate_month(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path((user_id, year, month)): Path<(String, i32, u32)>,
    Query(query): Query<ForceQuery>,
) -> Result<Json<CreatorEarningsMonthly>, ApiError> {
    let snapshot = state
        .service
        .aggregate_month(&user_id, year, month, query.force, &context)
        .await
        .map_err(|e| AppError::from(e).in_context(&context))?;

    Ok(Json(snapshot))
}

// =========================================================================
// POST /platform/:year/:month
// =========================================================================

async fn aggregate_platform_month(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path((year, month)): Path<(i32, u32)>,
    Query(query): Query<ForceQuery>,
) -> Result<Json<PlatformFinanceMonthly>, ApiError> {
    let snapshot = state
        .service
        .aggregate_platform_month(year, month, query.force, &context)
        .await
        .map_err(|e| AppError::from(e).in_context(&context))?;

    Ok(Json(snapshot))
}

// =========================================================================
// POST /anomalies/detect
// =========================================================================

async fn detect_anomalies(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    body: Option<Json<DetectRequest>>,
) -> Result<Json<DetectionReport>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let report = state
        .service
        .detect_anomalies(request.user_id.as_deref(), request.year, request.month, &context)
        .await
        .map_err(|e| AppError::from(e).in_context(&context))?;

    Ok(Json(report))
}

// =========================================================================
// GET /users/:user_id/summary
// =========================================================================

async fn get_summary(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<String>,
) -> Result<Json<UserFinancialSummary>, ApiError> {
    let summary = state
        .service
        .get_summary(&user_id)
        .await
        .map_err(|e| AppError::from(e).in_context(&context))?;

    Ok(Json(summary))
}
