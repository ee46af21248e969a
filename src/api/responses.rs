use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Exchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
}

/// Health of the streaming process
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthState,
    /// 0 until the first membership build is installed
    pub membership_generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus_connected: Option<bool>,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub timestamp: String,
}

/// Which exchange a symbol currently routes to
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SymbolRouteResponse {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<Exchange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub generation: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
