//! Library crate for survey-board-back, exposing modules for binaries and integration tests.

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Runtime configuration.
pub mod config;
/// Storage layer: document store abstraction, backends and entities.
pub mod dao;
/// Payloads exchanged over HTTP and SSE.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP route trees.
pub mod routes;
/// Controllers, projections and background tasks.
pub mod services;
/// Shared application state.
pub mod state;

/// Build the top-level router and attach cross-cutting middleware layers.
pub fn build_router(state: state::SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
