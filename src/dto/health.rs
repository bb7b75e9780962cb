use serde::Serialize;
use utoipa::ToSchema;

/// Overall service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Store reachable.
    Ok,
    /// Running without a usable store.
    Degraded,
}

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Whether the mirror currently knows the game state.
    pub synced: bool,
}

impl HealthResponse {
    /// Build a response from the degraded flag and mirror status.
    pub fn new(degraded: bool, synced: bool) -> Self {
        let status = if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        Self { status, synced }
    }
}
