use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the board backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::board_stream,
        crate::routes::sse::controls_stream,
        crate::routes::board::board_state,
        crate::routes::board::board_question,
        crate::routes::controls::view,
        crate::routes::controls::next_question,
        crate::routes::controls::previous_question,
        crate::routes::controls::reset_round,
        crate::routes::controls::reveal_answer,
        crate::routes::controls::wrong_answer,
        crate::routes::controls::change_round,
        crate::routes::controls::toggle_round,
        crate::routes::controls::start_game,
        crate::routes::controls::stop_game,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::common::GameStateView,
            crate::dto::board::BoardQuestionEvent,
            crate::dto::board::BoardQuestionView,
            crate::dto::board::BoardAnswerView,
            crate::dto::controls::ControlsView,
            crate::dto::controls::ControlsQuestionView,
            crate::dto::controls::ControlsAnswerView,
            crate::dto::controls::ControlGuards,
            crate::dto::controls::ActionResponse,
            crate::dto::controls::ActionOutcome,
            crate::dto::controls::ResetRoundRequest,
            crate::dto::controls::ChangeRoundRequest,
            crate::dto::controls::RevealRequest,
            crate::dto::controls::ConfirmRequest,
            crate::dto::sse::ControlsHandshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::AnswerFeedbackEvent,
            crate::state::game::GamePhase,
            crate::state::answers::AnswerValue,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "board", description = "Read-only board projections"),
        (name = "controls", description = "Operator actions, guarded by the controls token"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_controls_route_is_documented() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        for expected in [
            "/controls/question/next",
            "/controls/answers/reveal",
            "/controls/round/toggle",
            "/sse/controls",
            "/board/question",
        ] {
            assert!(paths.iter().any(|path| path == expected), "{expected} missing");
        }
    }
}
