use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use crate::database::DatabaseError;
use crate::membership::{MembershipBuilder, MembershipStore, MembershipSummary};
use crate::rabbitmq::{RabbitMQPublisher, RoutingKeyBuilder};
use crate::stream::{RouterStatsSnapshot, StreamRouter};

use super::responses::*;

/// Shared state for the ops endpoints
#[derive(Clone)]
pub struct OpsState {
    pub store: Arc<MembershipStore>,
    pub router: Arc<StreamRouter>,
    pub publisher: Option<Arc<RabbitMQPublisher>>,
    pub started_at: Instant,
}

/// Errors surfaced by the ops endpoints
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Membership refresh failed: {0}")]
    RefreshFailed(#[from] DatabaseError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::RefreshFailed(e) if e.is_connectivity() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RefreshFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Process health", body = HealthResponse)
    )
)]
pub async fn get_health(State(state): State<OpsState>) -> Json<HealthResponse> {
    let generation = state.store.current().generation();
    let bus_connected = state.publisher.as_ref().map(|p| p.is_connected());

    let warning = if generation == 0 {
        Some("Membership not built yet; all messages are dropped".to_string())
    } else if bus_connected == Some(false) {
        Some("Message bus disconnected".to_string())
    } else {
        None
    };

    Json(HealthResponse {
        status: if warning.is_some() {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        },
        membership_generation: generation,
        bus_connected,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        warning,
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Summary of the installed membership set
#[utoipa::path(
    get,
    path = "/api/v1/membership",
    tag = "Membership",
    responses(
        (status = 200, description = "Installed membership generation", body = MembershipSummary)
    )
)]
pub async fn get_membership(State(state): State<OpsState>) -> Json<MembershipSummary> {
    Json(state.store.current().summary())
}

/// Exchange a symbol would be routed to right now
#[utoipa::path(
    get,
    path = "/api/v1/membership/{symbol}",
    tag = "Membership",
    params(
        ("symbol" = String, Path, description = "Ticker symbol, e.g. AAPL")
    ),
    responses(
        (status = 200, description = "Routing decision for the symbol", body = SymbolRouteResponse)
    )
)]
pub async fn get_symbol_route(
    State(state): State<OpsState>,
    Path(symbol): Path<String>,
) -> Json<SymbolRouteResponse> {
    let membership = state.store.current();
    let exchange = membership.first_match(&symbol);

    Json(SymbolRouteResponse {
        symbol,
        exchange,
        topic: exchange.map(RoutingKeyBuilder::stream),
        generation: membership.generation(),
    })
}

/// Router counters
#[utoipa::path(
    get,
    path = "/api/v1/router/stats",
    tag = "Router",
    responses(
        (status = 200, description = "Routing counters since start", body = RouterStatsSnapshot)
    )
)]
pub async fn get_router_stats(State(state): State<OpsState>) -> Json<RouterStatsSnapshot> {
    Json(state.router.stats())
}

/// Rebuild membership from the warehouse now
#[utoipa::path(
    post,
    path = "/api/v1/membership/refresh",
    tag = "Membership",
    responses(
        (status = 200, description = "New generation installed", body = MembershipSummary),
        (status = 503, description = "Warehouse unreachable", body = ErrorResponse),
        (status = 500, description = "Warehouse query failed", body = ErrorResponse)
    )
)]
pub async fn refresh_membership(
    State(builder): State<MembershipBuilder>,
) -> Result<Json<MembershipSummary>, ApiError> {
    tracing::info!("Manual membership refresh requested");
    let summary = builder.rebuild().await?;
    Ok(Json(summary))
}
