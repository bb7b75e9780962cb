use serde::Serialize;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    dto::sse::{AnswerFeedbackEvent, ServerEvent, SystemStatus},
    services::board_service,
    state::{SharedState, answers::AnswerEvent},
};

const EVENT_GAME_STATE: &str = "game_state";
const EVENT_QUESTION: &str = "question";
const EVENT_CONTROLS: &str = "controls";
const EVENT_ANSWER: &str = "answer";
const EVENT_SYSTEM_STATUS: &str = "system_status";

/// Spawn the task forwarding mirror, answer and degraded-mode changes to both hubs.
pub fn spawn_broadcaster(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(run_broadcaster(state))
}

async fn run_broadcaster(state: SharedState) {
    let mirror = state.mirror();
    let mut phase_rx = mirror.subscribe_phase();
    let mut round_rx = mirror.subscribe_round();
    let mut questions_rx = mirror.subscribe_questions();
    let mut degraded_rx = state.degraded_watcher();
    let mut answers_rx = state.answers().subscribe();

    loop {
        tokio::select! {
            changed = phase_rx.changed() => {
                if changed.is_err() { break; }
                broadcast_game_state(&state);
                broadcast_controls_view(&state);
            }
            changed = round_rx.changed() => {
                if changed.is_err() { break; }
                broadcast_game_state(&state);
                broadcast_controls_view(&state);
            }
            changed = questions_rx.changed() => {
                if changed.is_err() { break; }
                broadcast_board_question(&state);
                broadcast_controls_view(&state);
            }
            changed = degraded_rx.changed() => {
                if changed.is_err() { break; }
                let degraded = *degraded_rx.borrow_and_update();
                broadcast_system_status(&state, degraded);
                broadcast_game_state(&state);
            }
            received = answers_rx.recv() => match received {
                Ok(event) => broadcast_answer(&state, event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "answer feedback lagged; dropping stale signals");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    debug!("SSE broadcaster stopped");
}

/// Broadcast the lifecycle snapshot to both streams.
pub fn broadcast_game_state(state: &SharedState) {
    if let Some(event) = game_state_event(state) {
        state.board_sse().broadcast(event.clone());
        state.controls_sse().broadcast(event);
    }
}

/// Broadcast the masked current question to the board.
pub fn broadcast_board_question(state: &SharedState) {
    if let Some(event) = board_question_event(state) {
        state.board_sse().broadcast(event);
    }
}

/// Broadcast the full controls view to the operator.
pub fn broadcast_controls_view(state: &SharedState) {
    if let Some(event) = controls_view_event(state) {
        state.controls_sse().broadcast(event);
    }
}

/// Broadcast answer feedback to both streams.
pub fn broadcast_answer(state: &SharedState, event: AnswerEvent) {
    let flash_ms = state.config().wrong_flash.as_millis() as u64;
    let payload = AnswerFeedbackEvent::new(event, flash_ms);
    if let Some(event) = make_event(EVENT_ANSWER, &payload) {
        state.board_sse().broadcast(event.clone());
        state.controls_sse().broadcast(event);
    }
}

/// Broadcast whether the backend runs without a store.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    if let Some(event) = make_event(EVENT_SYSTEM_STATUS, &SystemStatus { degraded }) {
        state.board_sse().broadcast(event.clone());
        state.controls_sse().broadcast(event);
    }
}

/// `game_state` event built from the mirror.
pub fn game_state_event(state: &SharedState) -> Option<ServerEvent> {
    make_event(EVENT_GAME_STATE, &board_service::game_state_view(state))
}

/// Board `question` event built from the mirror.
pub fn board_question_event(state: &SharedState) -> Option<ServerEvent> {
    make_event(EVENT_QUESTION, &board_service::board_question(state))
}

/// Controls `controls` event built from the mirror.
pub fn controls_view_event(state: &SharedState) -> Option<ServerEvent> {
    make_event(EVENT_CONTROLS, &board_service::controls_view(state))
}

fn make_event(event: &str, payload: &impl Serialize) -> Option<ServerEvent> {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize SSE payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig,
        state::{AppState, answers::AnswerValue},
    };

    #[tokio::test]
    async fn wrong_answers_reach_the_board_with_flash_duration() {
        let state = AppState::new(AppConfig::default());
        let mut board = state.board_sse().subscribe();
        let task = spawn_broadcaster(state.clone());
        tokio::task::yield_now().await;

        state
            .answers()
            .publish(AnswerEvent::new(AnswerValue::Wrong, Some("r1-q1".into())));

        let event = timeout(Duration::from_secs(1), async {
            loop {
                let event = board.recv().await.unwrap();
                if event.event.as_deref() == Some(EVENT_ANSWER) {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(payload["value"], "wrong");
        assert_eq!(payload["flash_ms"], 2000);
        assert_eq!(payload["question_id"], "r1-q1");
        task.abort();
    }

    #[tokio::test]
    async fn degraded_changes_are_announced() {
        let state = AppState::new(AppConfig::default());
        let mut controls = state.controls_sse().subscribe();
        let task = spawn_broadcaster(state.clone());
        tokio::task::yield_now().await;

        state.update_degraded(false);

        let event = timeout(Duration::from_secs(1), controls.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_SYSTEM_STATUS));
        assert_eq!(event.data, r#"{"degraded":false}"#);
        task.abort();
    }
}
