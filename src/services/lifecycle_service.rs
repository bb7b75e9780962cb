//! Round and game lifecycle transitions written to the game state document.

use tracing::info;

use crate::{
    dao::{
        doc_store::{DocKey, Fields, to_fields},
        models::{GameStateEntity, game_state_key},
        retry::with_retry,
    },
    dto::controls::{ActionOutcome, ActionResponse},
    error::ServiceError,
    services::{
        board_service::controls_view,
        navigation_service::{is_rewound, rewind_updates},
    },
    state::{
        SharedState,
        game::{GamePhase, GameState, Round},
        state_machine::{GameEvent, next_phase, requires_confirmation, resets_round},
    },
};

/// Switch to `round`; always lands in the lobby with the round rewound.
pub async fn change_round(
    state: &SharedState,
    round: Round,
) -> Result<ActionResponse, ServiceError> {
    transition(state, "change_round", true, move |_| {
        GameEvent::ChangeRound(round)
    })
    .await
}

/// Start the round from the lobby, or stop (rewind) it while it is being played.
pub async fn start_or_stop_round(
    state: &SharedState,
    confirmed: bool,
) -> Result<ActionResponse, ServiceError> {
    transition(state, "start_or_stop_round", confirmed, |phase| {
        if phase == GamePhase::Active {
            GameEvent::StopRound
        } else {
            GameEvent::StartRound
        }
    })
    .await
}

/// Leave the ended screen for a new game.
pub async fn start_game(
    state: &SharedState,
    confirmed: bool,
) -> Result<ActionResponse, ServiceError> {
    transition(state, "start_game", confirmed, |_| GameEvent::StartGame).await
}

/// End the game after rewinding the round in play.
pub async fn stop_game(
    state: &SharedState,
    confirmed: bool,
) -> Result<ActionResponse, ServiceError> {
    transition(state, "stop_game", confirmed, |_| GameEvent::StopGame).await
}

async fn transition<R>(
    state: &SharedState,
    operation: &'static str,
    confirmed: bool,
    resolve: R,
) -> Result<ActionResponse, ServiceError>
where
    R: FnOnce(GamePhase) -> GameEvent,
{
    let outcome = state
        .run_exclusive(operation, move || async move {
            let store = state.require_store().await?;
            let current = state.mirror().game_state().ok_or_else(|| {
                ServiceError::InvalidState("game state is not known yet".into())
            })?;

            let event = resolve(current.phase);
            let phase = next_phase(current.phase, event)?;
            if requires_confirmation(event) && !confirmed {
                info!(?event, "operator declined the transition");
                return Ok(ActionOutcome::Declined);
            }

            let round = match event {
                GameEvent::ChangeRound(round) => round,
                _ => current.round,
            };
            let mut updates = if resets_round(event) {
                rewind_updates(&store, round).await?
            } else {
                Vec::new()
            };
            updates.push(game_state_update(GameState { phase, round })?);
            let questions = updates.len() - 1;
            with_retry("write game state", || store.update_many(updates.clone())).await?;
            info!(?event, from = ?current.phase, to = ?phase, %round, questions, "game state updated");

            state
                .settle_game(operation, move |mirrored_phase, mirrored_round| {
                    mirrored_phase == Some(phase) && mirrored_round == Some(round)
                })
                .await;
            if resets_round(event) {
                state
                    .settle_questions(operation, move |set| is_rewound(set, round))
                    .await;
            }
            Ok(ActionOutcome::Applied)
        })
        .await?;

    Ok(ActionResponse {
        outcome,
        view: controls_view(state),
    })
}

/// The game state write, applied together with any round rewind.
fn game_state_update(game: GameState) -> Result<(DocKey, Fields), ServiceError> {
    Ok((game_state_key(), to_fields(&GameStateEntity::from(game))?))
}
