use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the store and report whether the mirror is in sync.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let synced = state.mirror().game_state().is_some();
    HealthResponse::new(state.is_degraded(), synced)
}
