use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::doc_store::{DocKey, Fields};

/// Collection holding the singleton game state document.
pub const GAME_COLLECTION: &str = "game";
/// Identifier of the singleton game state document.
pub const GAME_STATE_ID: &str = "state";
/// Collection holding every question of every round.
pub const QUESTION_COLLECTION: &str = "questions";

/// Key of the singleton game state document.
pub fn game_state_key() -> DocKey {
    DocKey::new(GAME_COLLECTION, GAME_STATE_ID)
}

/// Key of a question document.
pub fn question_key(id: impl Into<String>) -> DocKey {
    DocKey::new(QUESTION_COLLECTION, id)
}

/// Singleton lifecycle document (`game/state`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameStateEntity {
    /// Lifecycle phase encoded as 0 (lobby), 1 (active) or 2 (ended).
    pub state: u8,
    /// Round currently in play (1, 2 or 3).
    pub round: u8,
}

/// Question document stored in the `questions` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// 1-based ordinal unique within the round.
    pub number: u32,
    /// Question text shown on the board.
    pub question: String,
    /// Ranked answers, replaced as a whole on every update.
    pub answers: Vec<AnswerEntity>,
    /// Whether this question is the one currently displayed for its round.
    pub active: bool,
    /// Round the question belongs to.
    pub round: u8,
}

/// Answer embedded in a [`QuestionEntity`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Rank of the answer, unique within its question.
    pub top: u32,
    /// Answer text.
    pub title: String,
    /// Points awarded for the answer.
    pub score: i32,
    /// Whether the answer is visible on the board.
    #[serde(default)]
    pub revealed: bool,
}

/// Partial update setting a question's `active` flag.
pub fn activation_fields(active: bool) -> Fields {
    let mut fields = Fields::new();
    fields.insert("active".into(), Value::Bool(active));
    fields
}

/// Partial update replacing the whole answer array of a question.
pub fn answers_fields(answers: &[AnswerEntity]) -> serde_json::Result<Fields> {
    let mut fields = Fields::new();
    fields.insert("answers".into(), serde_json::to_value(answers)?);
    Ok(fields)
}
