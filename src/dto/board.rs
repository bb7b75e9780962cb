//! Board projections: what the public display is allowed to show.

use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

use crate::state::game::{Answer, Question};

/// One answer slot on the board. Hidden slots only expose their rank.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BoardAnswerView {
    pub top: u32,
    pub revealed: bool,
    /// Present once revealed.
    pub title: Option<String>,
    /// Present once revealed.
    pub score: Option<i32>,
}

impl From<&Answer> for BoardAnswerView {
    fn from(answer: &Answer) -> Self {
        let (title, score) = if answer.revealed {
            (Some(answer.title.clone()), Some(answer.score))
        } else {
            (None, None)
        };
        Self {
            top: answer.top,
            revealed: answer.revealed,
            title,
            score,
        }
    }
}

/// Current question as rendered by the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BoardQuestionView {
    pub id: String,
    pub number: u32,
    /// Number of questions in the round.
    pub total: usize,
    pub question: String,
    pub answers: Vec<BoardAnswerView>,
    /// Sum of the revealed scores.
    pub revealed_score: i32,
}

impl BoardQuestionView {
    /// Mask a question for public display.
    pub fn new(id: &str, question: &Question, total: usize) -> Self {
        Self {
            id: id.to_owned(),
            number: question.number,
            total,
            question: question.question.clone(),
            answers: question.answers.iter().map(BoardAnswerView::from).collect(),
            revealed_score: question
                .answers
                .iter()
                .filter(|answer| answer.revealed)
                .map(|answer| answer.score)
                .sum(),
        }
    }
}

/// Payload of the board `question` event and of `GET /board/question`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BoardQuestionEvent {
    pub round: Option<u8>,
    /// `null` when the round has no current question.
    pub question: Option<BoardQuestionView>,
}
