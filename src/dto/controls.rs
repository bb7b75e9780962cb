//! DTO definitions used by the operator controls API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{dto::common::GameStateView, state::game::Answer};

/// Full answer as seen by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ControlsAnswerView {
    pub top: u32,
    pub title: String,
    pub score: i32,
    pub revealed: bool,
}

impl From<&Answer> for ControlsAnswerView {
    fn from(answer: &Answer) -> Self {
        Self {
            top: answer.top,
            title: answer.title.clone(),
            score: answer.score,
            revealed: answer.revealed,
        }
    }
}

/// Current question, unmasked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ControlsQuestionView {
    pub id: String,
    pub number: u32,
    pub question: String,
    pub answers: Vec<ControlsAnswerView>,
}

/// Which operator actions are currently accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ControlGuards {
    /// `POST /controls/question/next` would be accepted.
    pub can_advance: bool,
    /// `POST /controls/question/prev` would be accepted.
    pub can_retreat: bool,
    /// Reveal and wrong-answer actions would be accepted.
    pub can_reveal: bool,
}

/// Everything the controls page renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ControlsView {
    pub game: GameStateView,
    pub question: Option<ControlsQuestionView>,
    /// Number of questions in the round ("question N of total").
    pub total: usize,
    pub guards: ControlGuards,
    /// More than one question of the round is flagged active.
    pub active_conflict: bool,
}

/// Whether an action was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The store was updated.
    Applied,
    /// The operator declined the confirmation; nothing was written.
    Declined,
}

/// Response of every controls action.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActionResponse {
    pub outcome: ActionOutcome,
    /// Controls view once the mirror reflects the action.
    pub view: ControlsView,
}

/// Reset a round; defaults to the round in play.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct ResetRoundRequest {
    #[validate(range(min = 1, max = 3))]
    #[serde(default)]
    pub round: Option<u8>,
}

/// Switch to another round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ChangeRoundRequest {
    #[validate(range(min = 1, max = 3))]
    pub round: u8,
}

/// Toggle the visibility of one answer of the current question.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RevealRequest {
    /// Rank of the answer.
    #[validate(range(min = 1))]
    pub top: u32,
}

/// Operator confirmation for destructive transitions.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct ConfirmRequest {
    /// `false` abandons the action.
    #[serde(default)]
    pub confirm: bool,
}
