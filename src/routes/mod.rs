use axum::Router;

use crate::state::SharedState;

pub mod board;
pub mod controls;
pub mod docs;
pub mod health;
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(board::router())
        .merge(controls::router(state.clone()));

    api_router.merge(docs::router()).with_state(state)
}
