use axum::{
    routing::{get, post},
    Json, Router,
};
use utoipa::OpenApi;

use crate::membership::MembershipBuilder;

use super::handlers::*;
use super::openapi::ApiDoc;

/// Create the ops router
///
/// The manual refresh endpoint is only mounted when a warehouse is configured.
pub fn create_router(state: OpsState, builder: Option<MembershipBuilder>) -> Router {
    let router = Router::new()
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .route("/api/v1/health", get(get_health))
        .route("/api/v1/membership", get(get_membership))
        .route("/api/v1/membership/:symbol", get(get_symbol_route))
        .route("/api/v1/router/stats", get(get_router_stats))
        .with_state(state);

    if let Some(builder) = builder {
        let refresh_router = Router::new()
            .route("/api/v1/membership/refresh", post(refresh_membership))
            .with_state(builder);

        router.merge(refresh_router)
    } else {
        router
    }
}
