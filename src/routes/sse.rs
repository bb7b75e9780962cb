use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{
    error::AppError,
    services::sse_service::{self, StreamKind},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/board",
    tag = "sse",
    responses((status = 200, description = "Board SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream masked board updates and answer feedback to displays.
pub async fn board_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let (receiver, snapshot) = sse_service::subscribe_board(&state);
    info!("new board SSE connection");
    sse_service::to_sse_stream(receiver, snapshot, StreamKind::Board)
}

#[utoipa::path(
    get,
    path = "/sse/controls",
    tag = "sse",
    responses(
        (status = 200, description = "Controls SSE stream, first event carries the operator token", content_type = "text/event-stream", body = String),
        (status = 401, description = "Another controls stream is already open")
    )
)]
/// Stream the operator view, issuing the token required by `/controls/*`.
pub async fn controls_stream(
    State(state): State<SharedState>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    let subscription = sse_service::subscribe_controls(&state).await?;
    info!("new controls SSE connection");
    Ok(sse_service::to_sse_stream(
        subscription.receiver,
        subscription.snapshot,
        StreamKind::Controls {
            state,
            token: subscription.token,
        },
    ))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/board", get(board_stream))
        .route("/sse/controls", get(controls_stream))
}
