use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::membership::{ExchangeMembership, MembershipSummary};
use crate::models::Exchange;
use crate::stream::router::{ExchangeRouted, RouterState, RouterStatsSnapshot};

/// OpenAPI specification for the ops endpoints
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Market-cap Router",
        version = "0.1.0",
        description = "Operational endpoints of the streaming membership router"
    ),
    paths(
        handlers::get_health,
        handlers::get_membership,
        handlers::get_symbol_route,
        handlers::get_router_stats,
        handlers::refresh_membership,
    ),
    components(
        schemas(
            HealthResponse,
            HealthState,
            SymbolRouteResponse,
            ErrorResponse,
            MembershipSummary,
            ExchangeMembership,
            Exchange,
            RouterStatsSnapshot,
            RouterState,
            ExchangeRouted,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Membership", description = "Exchange membership index"),
        (name = "Router", description = "Stream routing statistics"),
    )
)]
pub struct ApiDoc;
