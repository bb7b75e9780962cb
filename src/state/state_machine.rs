use thiserror::Error;

use crate::state::game::{GamePhase, Round};

/// Operator actions that change the game state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Open the current round for play.
    StartRound,
    /// Close the current round and rewind it.
    StopRound,
    /// Switch to another round; always lands in the lobby.
    ChangeRound(Round),
    /// End the whole game.
    StopGame,
    /// Leave the ended screen and return to the lobby.
    StartGame,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the game was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Whether an event rewinds the round's questions before the state write.
pub fn resets_round(event: GameEvent) -> bool {
    matches!(
        event,
        GameEvent::StopRound | GameEvent::StopGame | GameEvent::ChangeRound(_)
    )
}

/// Whether an event is destructive and must be confirmed by the operator.
pub fn requires_confirmation(event: GameEvent) -> bool {
    matches!(
        event,
        GameEvent::StopRound | GameEvent::StopGame | GameEvent::StartGame
    )
}

/// Compute the next phase for an event if the transition is valid.
///
/// `LOBBY <-> ACTIVE` through start/stop round, any phase to `ENDED` through
/// stop game, `ENDED -> LOBBY` through start game. A round change is accepted
/// from every phase and forces the lobby.
pub fn next_phase(from: GamePhase, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
    let next = match (from, event) {
        (GamePhase::Lobby, GameEvent::StartRound) => GamePhase::Active,
        (GamePhase::Active, GameEvent::StopRound) => GamePhase::Lobby,
        (_, GameEvent::ChangeRound(_)) => GamePhase::Lobby,
        (_, GameEvent::StopGame) => GamePhase::Ended,
        (GamePhase::Ended, GameEvent::StartGame) => GamePhase::Lobby,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}
