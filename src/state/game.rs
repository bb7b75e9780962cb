use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::dao::models::{AnswerEntity, GameStateEntity, QuestionEntity};

/// Number of rounds a game is split into.
pub const ROUND_COUNT: u8 = 3;

/// Error raised when a stored value falls outside of the domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Round outside of `1..=3`.
    #[error("invalid round {0}, expected 1..=3")]
    InvalidRound(u8),
    /// Lifecycle code outside of `0..=2`.
    #[error("invalid game state code {0}")]
    InvalidPhase(u8),
}

/// Coarse lifecycle phase of the game, stored as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Between rounds: reveals and navigation are locked.
    Lobby,
    /// A round is being played.
    Active,
    /// The game is over until the operator starts a new one.
    Ended,
}

impl GamePhase {
    /// Numeric code used in the store.
    pub fn code(self) -> u8 {
        match self {
            GamePhase::Lobby => 0,
            GamePhase::Active => 1,
            GamePhase::Ended => 2,
        }
    }
}

impl TryFrom<u8> for GamePhase {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GamePhase::Lobby),
            1 => Ok(GamePhase::Active),
            2 => Ok(GamePhase::Ended),
            other => Err(DomainError::InvalidPhase(other)),
        }
    }
}

/// One of the three independent question sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(transparent)]
pub struct Round(u8);

impl Round {
    /// Round every game starts with.
    pub const FIRST: Round = Round(1);

    /// Validate a raw round number.
    pub fn new(value: u8) -> Result<Self, DomainError> {
        if (1..=ROUND_COUNT).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DomainError::InvalidRound(value))
        }
    }

    /// Raw round number.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Round {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = u8::deserialize(deserializer)?;
        Round::new(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mirror of the singleton game state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameState {
    /// Lifecycle phase.
    pub phase: GamePhase,
    /// Round in play.
    pub round: Round,
}

impl GameState {
    /// State written by seeding and by a fresh game.
    pub fn initial() -> Self {
        Self {
            phase: GamePhase::Lobby,
            round: Round::FIRST,
        }
    }
}

impl TryFrom<GameStateEntity> for GameState {
    type Error = DomainError;

    fn try_from(value: GameStateEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            phase: GamePhase::try_from(value.state)?,
            round: Round::new(value.round)?,
        })
    }
}

impl From<GameState> for GameStateEntity {
    fn from(value: GameState) -> Self {
        Self {
            state: value.phase.code(),
            round: value.round.get(),
        }
    }
}

/// Ranked answer of a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Rank, used as the stable identity of the answer.
    pub top: u32,
    /// Answer text.
    pub title: String,
    /// Points awarded.
    pub score: i32,
    /// Visible on the board.
    pub revealed: bool,
}

/// A question of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// 1-based ordinal within the round.
    pub number: u32,
    /// Question text.
    pub question: String,
    /// Ordered answers.
    pub answers: Vec<Answer>,
    /// Currently displayed question of its round.
    pub active: bool,
    /// Owning round.
    pub round: Round,
}

impl Question {
    /// Look up an answer by rank.
    pub fn answer(&self, top: u32) -> Option<&Answer> {
        self.answers.iter().find(|answer| answer.top == top)
    }

    /// Answers with every `revealed` flag cleared.
    pub fn hidden_answers(&self) -> Vec<Answer> {
        self.answers
            .iter()
            .cloned()
            .map(|answer| Answer {
                revealed: false,
                ..answer
            })
            .collect()
    }
}

impl From<AnswerEntity> for Answer {
    fn from(value: AnswerEntity) -> Self {
        Self {
            top: value.top,
            title: value.title,
            score: value.score,
            revealed: value.revealed,
        }
    }
}

impl From<Answer> for AnswerEntity {
    fn from(value: Answer) -> Self {
        Self {
            top: value.top,
            title: value.title,
            score: value.score,
            revealed: value.revealed,
        }
    }
}

impl TryFrom<QuestionEntity> for Question {
    type Error = DomainError;

    fn try_from(value: QuestionEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            number: value.number,
            question: value.question,
            answers: value.answers.into_iter().map(Into::into).collect(),
            active: value.active,
            round: Round::new(value.round)?,
        })
    }
}

impl From<Question> for QuestionEntity {
    fn from(value: Question) -> Self {
        Self {
            number: value.number,
            question: value.question,
            answers: value.answers.into_iter().map(Into::into).collect(),
            active: value.active,
            round: value.round.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_codes_round_trip() {
        for phase in [GamePhase::Lobby, GamePhase::Active, GamePhase::Ended] {
            assert_eq!(GamePhase::try_from(phase.code()), Ok(phase));
        }
        assert_eq!(GamePhase::try_from(3), Err(DomainError::InvalidPhase(3)));
    }

    #[test]
    fn rounds_are_bounded() {
        assert!(Round::new(0).is_err());
        assert_eq!(Round::new(3).map(Round::get), Ok(3));
        assert!(Round::new(4).is_err());
        assert!(serde_json::from_str::<Round>("4").is_err());
        assert_eq!(serde_json::from_str::<Round>("2").unwrap(), Round::new(2).unwrap());
    }

    #[test]
    fn malformed_state_entity_is_rejected() {
        let entity = GameStateEntity { state: 1, round: 9 };
        assert_eq!(
            GameState::try_from(entity),
            Err(DomainError::InvalidRound(9))
        );
    }

    #[test]
    fn hidden_answers_keep_order_and_titles() {
        let question = Question {
            number: 1,
            question: "Name a fruit".into(),
            answers: vec![
                Answer {
                    top: 1,
                    title: "Apple".into(),
                    score: 40,
                    revealed: true,
                },
                Answer {
                    top: 2,
                    title: "Banana".into(),
                    score: 30,
                    revealed: false,
                },
            ],
            active: true,
            round: Round::FIRST,
        };

        let hidden = question.hidden_answers();
        assert_eq!(hidden.len(), 2);
        assert!(hidden.iter().all(|answer| !answer.revealed));
        assert_eq!(hidden[0].title, "Apple");
        assert_eq!(question.answer(2).map(|a| a.score), Some(30));
    }
}
