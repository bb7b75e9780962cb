use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::{board::BoardQuestionEvent, common::GameStateView},
    services::board_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/board/state",
    tag = "board",
    responses((status = 200, description = "Lifecycle snapshot", body = GameStateView))
)]
/// Current phase and round as mirrored from the store.
pub async fn board_state(State(state): State<SharedState>) -> Json<GameStateView> {
    Json(board_service::game_state_view(&state))
}

#[utoipa::path(
    get,
    path = "/board/question",
    tag = "board",
    responses((status = 200, description = "Current question with unrevealed answers masked", body = BoardQuestionEvent))
)]
/// Current question as the board shows it.
pub async fn board_question(State(state): State<SharedState>) -> Json<BoardQuestionEvent> {
    Json(board_service::board_question(&state))
}

/// Public read-only board routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/board/state", get(board_state))
        .route("/board/question", get(board_question))
}
