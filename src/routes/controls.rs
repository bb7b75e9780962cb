use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::controls::{
        ActionResponse, ChangeRoundRequest, ConfirmRequest, ControlsView, ResetRoundRequest,
        RevealRequest,
    },
    error::AppError,
    services::{
        board_service, lifecycle_service, navigation_service, reveal_service, sse_service,
    },
    state::{SharedState, game::Round},
};

const CONTROLS_TOKEN_HEADER: &str = "x-controls-token";

/// Operator-only routes driving the game.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/controls/view", get(view))
        .route("/controls/question/next", post(next_question))
        .route("/controls/question/prev", post(previous_question))
        .route("/controls/round/reset", post(reset_round))
        .route("/controls/answers/reveal", post(reveal_answer))
        .route("/controls/answers/wrong", post(wrong_answer))
        .route("/controls/round", post(change_round))
        .route("/controls/round/toggle", post(toggle_round))
        .route("/controls/game/start", post(start_game))
        .route("/controls/game/stop", post(stop_game))
        .route_layer(middleware::from_fn_with_state(state, require_controls_token))
}

fn parse_round(raw: u8) -> Result<Round, AppError> {
    Round::new(raw).map_err(|err| AppError::BadRequest(err.to_string()))
}

/// Full operator view.
#[utoipa::path(
    get,
    path = "/controls/view",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    responses((status = 200, description = "Controls view", body = ControlsView))
)]
pub async fn view(State(state): State<SharedState>) -> Json<ControlsView> {
    Json(board_service::controls_view(&state))
}

/// Activate the next question of the round.
#[utoipa::path(
    post,
    path = "/controls/question/next",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    responses(
        (status = 200, description = "Moved to the next question", body = ActionResponse),
        (status = 409, description = "Locked, no current question, or already at the last question")
    )
)]
pub async fn next_question(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(navigation_service::advance(&state).await?))
}

/// Activate the previous question of the round.
#[utoipa::path(
    post,
    path = "/controls/question/prev",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    responses(
        (status = 200, description = "Moved to the previous question", body = ActionResponse),
        (status = 409, description = "Locked, no current question, or already at question 1")
    )
)]
pub async fn previous_question(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(navigation_service::retreat(&state).await?))
}

/// Rewind a round to question 1 with every answer hidden.
#[utoipa::path(
    post,
    path = "/controls/round/reset",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    request_body = ResetRoundRequest,
    responses((status = 200, description = "Round rewound", body = ActionResponse))
)]
pub async fn reset_round(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ResetRoundRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let round = payload.round.map(parse_round).transpose()?;
    Ok(Json(navigation_service::reset_round(&state, round).await?))
}

/// Toggle an answer of the current question.
#[utoipa::path(
    post,
    path = "/controls/answers/reveal",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    request_body = RevealRequest,
    responses(
        (status = 200, description = "Answer toggled", body = ActionResponse),
        (status = 404, description = "No answer with this rank"),
        (status = 409, description = "Answers are locked or no current question")
    )
)]
pub async fn reveal_answer(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<RevealRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(reveal_service::reveal(&state, payload.top).await?))
}

/// Signal a wrong answer.
#[utoipa::path(
    post,
    path = "/controls/answers/wrong",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    responses(
        (status = 200, description = "Wrong answer signalled", body = ActionResponse),
        (status = 409, description = "Answers are locked")
    )
)]
pub async fn wrong_answer(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(reveal_service::wrong_answer(&state).await?))
}

/// Switch to another round.
#[utoipa::path(
    post,
    path = "/controls/round",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    request_body = ChangeRoundRequest,
    responses((status = 200, description = "Round changed, lobby forced", body = ActionResponse))
)]
pub async fn change_round(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ChangeRoundRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let round = parse_round(payload.round)?;
    Ok(Json(lifecycle_service::change_round(&state, round).await?))
}

/// Start the round, or stop it when it is being played.
#[utoipa::path(
    post,
    path = "/controls/round/toggle",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Round started, stopped, or stop declined", body = ActionResponse),
        (status = 409, description = "The game has ended")
    )
)]
pub async fn toggle_round(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ConfirmRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        lifecycle_service::start_or_stop_round(&state, payload.confirm).await?,
    ))
}

/// Leave the ended screen for a new game.
#[utoipa::path(
    post,
    path = "/controls/game/start",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Game restarted or declined", body = ActionResponse),
        (status = 409, description = "The game has not ended")
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ConfirmRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        lifecycle_service::start_game(&state, payload.confirm).await?,
    ))
}

/// End the game.
#[utoipa::path(
    post,
    path = "/controls/game/stop",
    tag = "controls",
    params(("X-Controls-Token" = String, Header, description = "Token issued by the /sse/controls stream")),
    request_body = ConfirmRequest,
    responses((status = 200, description = "Game ended or declined", body = ActionResponse))
)]
pub async fn stop_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ConfirmRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        lifecycle_service::stop_game(&state, payload.confirm).await?,
    ))
}

async fn require_controls_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(CONTROLS_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| {
            AppError::Unauthorized("missing controls token header `X-Controls-Token`".into())
        })?;

    sse_service::verify_controls_token(&state, &provided)
        .await
        .map_err(AppError::from)?;
    Ok(next.run(req).await)
}

