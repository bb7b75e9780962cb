//! Moves the current-question pointer of a round.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    dao::{
        doc_store::{DocKey, DocumentStore, Fields, Filter},
        models::{
            AnswerEntity, QUESTION_COLLECTION, QuestionEntity, activation_fields, answers_fields,
            question_key,
        },
        retry::with_retry,
    },
    dto::controls::{ActionOutcome, ActionResponse},
    error::ServiceError,
    services::board_service::{controls_view, play_open},
    state::{SharedState, game::Round, questions::QuestionSet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn operation(self) -> &'static str {
        match self {
            Direction::Forward => "advance",
            Direction::Backward => "retreat",
        }
    }
}

/// Activate the next question of the round.
pub async fn advance(state: &SharedState) -> Result<ActionResponse, ServiceError> {
    step(state, Direction::Forward).await
}

/// Activate the previous question of the round.
pub async fn retreat(state: &SharedState) -> Result<ActionResponse, ServiceError> {
    step(state, Direction::Backward).await
}

/// Rewind a round: question 1 active, every answer hidden.
///
/// Defaults to the round in play.
pub async fn reset_round(
    state: &SharedState,
    round: Option<Round>,
) -> Result<ActionResponse, ServiceError> {
    state
        .run_exclusive("reset_round", move || async move {
            let store = state.require_store().await?;
            let round = match round {
                Some(round) => round,
                None => state
                    .mirror()
                    .round()
                    .ok_or_else(|| ServiceError::InvalidState("round is not known yet".into()))?,
            };

            rewind_round(&store, round).await?;
            if state.mirror().round() == Some(round) {
                state
                    .settle_questions("reset_round", move |set| is_rewound(set, round))
                    .await;
            }
            Ok(())
        })
        .await?;

    Ok(ActionResponse {
        outcome: ActionOutcome::Applied,
        view: controls_view(state),
    })
}

async fn step(state: &SharedState, direction: Direction) -> Result<ActionResponse, ServiceError> {
    let operation = direction.operation();
    state
        .run_exclusive(operation, move || async move {
            let store = state.require_store().await?;
            let mirror = state.mirror();

            if !play_open(mirror.phase()) {
                return Err(ServiceError::InvalidState(
                    "navigation is locked until the round starts".into(),
                ));
            }
            let round = mirror
                .round()
                .ok_or_else(|| ServiceError::InvalidState("round is not known yet".into()))?;
            let (current_id, current) = mirror
                .current_question()
                .ok_or_else(|| ServiceError::InvalidState("no current question".into()))?;

            let target = match direction {
                Direction::Forward => {
                    let last = mirror.questions().max_number().unwrap_or(current.number);
                    if current.number >= last {
                        return Err(ServiceError::InvalidState(
                            "already at the last question of the round".into(),
                        ));
                    }
                    current.number + 1
                }
                Direction::Backward => {
                    if current.number <= 1 {
                        return Err(ServiceError::InvalidState(
                            "already at the first question of the round".into(),
                        ));
                    }
                    current.number - 1
                }
            };

            let filter = Filter::all()
                .eq("number", target)
                .eq("round", round.get());
            let targets = with_retry("find target question", || {
                store.query(QUESTION_COLLECTION.to_owned(), filter.clone())
            })
            .await?;
            let Some(first) = targets.first() else {
                return Err(ServiceError::NotFound(format!(
                    "question {target} of round {round} does not exist"
                )));
            };
            if targets.len() > 1 {
                warn!(target, %round, count = targets.len(), "several questions share a number");
            }

            let mut updates = vec![(question_key(&current_id), activation_fields(false))];
            updates.extend(
                targets
                    .iter()
                    .filter(|doc| doc.id != current_id)
                    .map(|doc| (question_key(&doc.id), activation_fields(true))),
            );
            with_retry("switch active question", || store.update_many(updates.clone())).await?;
            info!(from = current.number, to = target, %round, "moved current question");

            let target_id = first.id.clone();
            state
                .settle_questions(operation, move |set| {
                    set.current_id() == Some(target_id.as_str())
                })
                .await;
            Ok(())
        })
        .await?;

    Ok(ActionResponse {
        outcome: ActionOutcome::Applied,
        view: controls_view(state),
    })
}

/// Write the rewound flags of every question of `round` as one unit.
pub(crate) async fn rewind_round(
    store: &Arc<dyn DocumentStore>,
    round: Round,
) -> Result<(), ServiceError> {
    let updates = rewind_updates(store, round).await?;
    if updates.is_empty() {
        warn!(%round, "round has no question to reset");
        return Ok(());
    }
    let questions = updates.len();
    with_retry("reset round", || store.update_many(updates.clone())).await?;
    info!(%round, questions, "round reset");
    Ok(())
}

/// Partial updates rewinding `round`: question 1 active, every answer hidden.
pub(crate) async fn rewind_updates(
    store: &Arc<dyn DocumentStore>,
    round: Round,
) -> Result<Vec<(DocKey, Fields)>, ServiceError> {
    let filter = Filter::all().eq("round", round.get());
    let documents = with_retry("load round questions", || {
        store.query(QUESTION_COLLECTION.to_owned(), filter.clone())
    })
    .await?;

    let mut updates = Vec::with_capacity(documents.len());
    for document in &documents {
        let fields = match document.decode::<QuestionEntity>() {
            Ok(entity) => rewound_fields(entity.number == 1, &entity.answers)?,
            Err(err) => {
                // Still fix the pointer; the answers cannot be rewritten safely.
                warn!(id = %document.id, error = %err, "malformed question during reset");
                let number = document.fields.get("number").and_then(|n| n.as_u64());
                activation_fields(number == Some(1))
            }
        };
        updates.push((question_key(&document.id), fields));
    }
    Ok(updates)
}

fn rewound_fields(active: bool, answers: &[AnswerEntity]) -> Result<Fields, ServiceError> {
    let hidden: Vec<AnswerEntity> = answers
        .iter()
        .cloned()
        .map(|answer| AnswerEntity {
            revealed: false,
            ..answer
        })
        .collect();
    let mut fields = answers_fields(&hidden)?;
    fields.extend(activation_fields(active));
    Ok(fields)
}

/// Whether the mirrored set shows `round` rewound.
pub(crate) fn is_rewound(set: &QuestionSet, round: Round) -> bool {
    if set.round() != Some(round) || !set.is_loaded() {
        return false;
    }
    if set.is_empty() {
        return true;
    }
    let all_hidden = set
        .ordered()
        .iter()
        .all(|(_, question)| question.answers.iter().all(|answer| !answer.revealed));
    all_hidden && set.current().is_some_and(|(_, question)| question.number == 1)
}
