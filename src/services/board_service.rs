//! Read-only projections of the mirror for the board and controls views.

use crate::{
    dto::{
        board::{BoardQuestionEvent, BoardQuestionView},
        common::GameStateView,
        controls::{ControlGuards, ControlsAnswerView, ControlsQuestionView, ControlsView},
    },
    state::{AppState, game::GamePhase, questions::QuestionSet},
};

/// Whether answers and navigation are unlocked in this phase.
///
/// Only the lobby locks them; an unknown phase is treated as locked.
pub fn play_open(phase: Option<GamePhase>) -> bool {
    phase.is_some_and(|phase| phase != GamePhase::Lobby)
}

/// Lifecycle snapshot shared by both views.
pub fn game_state_view(state: &AppState) -> GameStateView {
    let mirror = state.mirror();
    GameStateView {
        phase: mirror.phase(),
        round: mirror.round().map(|round| round.get()),
        degraded: state.is_degraded(),
    }
}

/// Masked current question for the board.
pub fn board_question(state: &AppState) -> BoardQuestionEvent {
    project_board(&state.mirror().questions())
}

/// Full controls projection.
pub fn controls_view(state: &AppState) -> ControlsView {
    let game = game_state_view(state);
    project_controls(game, &state.mirror().questions())
}

pub(crate) fn project_board(set: &QuestionSet) -> BoardQuestionEvent {
    BoardQuestionEvent {
        round: set.round().map(|round| round.get()),
        question: set
            .current()
            .map(|(id, question)| BoardQuestionView::new(id, question, set.len())),
    }
}

pub(crate) fn project_controls(game: GameStateView, set: &QuestionSet) -> ControlsView {
    let guards = guards(game.phase, set);
    let question = set.current().map(|(id, question)| ControlsQuestionView {
        id: id.to_owned(),
        number: question.number,
        question: question.question.clone(),
        answers: question
            .answers
            .iter()
            .map(ControlsAnswerView::from)
            .collect(),
    });

    ControlsView {
        game,
        question,
        total: set.len(),
        guards,
        active_conflict: set.has_active_conflict(),
    }
}

/// Disabled-button rules of the controls page.
pub fn guards(phase: Option<GamePhase>, set: &QuestionSet) -> ControlGuards {
    let Some((_, current)) = set.current() else {
        return ControlGuards::default();
    };
    if !play_open(phase) {
        return ControlGuards::default();
    }

    ControlGuards {
        can_advance: set.max_number().is_some_and(|max| current.number < max),
        can_retreat: current.number > 1,
        can_reveal: true,
    }
}
