//! Answer reveals and wrong-answer feedback.

use tracing::info;

use crate::{
    dao::{
        models::{QuestionEntity, answers_fields, question_key},
        retry::with_retry,
    },
    dto::controls::{ActionOutcome, ActionResponse},
    error::ServiceError,
    services::board_service::{controls_view, play_open},
    state::{
        SharedState,
        answers::{AnswerEvent, AnswerValue},
    },
};

fn ensure_play_open(state: &SharedState) -> Result<(), ServiceError> {
    if play_open(state.mirror().phase()) {
        Ok(())
    } else {
        Err(ServiceError::InvalidState(
            "answers are locked until the round starts".into(),
        ))
    }
}

/// Toggle the visibility of the answer ranked `top` on the current question.
///
/// The question is re-read from the store so the toggle applies to the latest
/// answer array, which is then written back as a whole. A `correct` signal is
/// published only when the answer becomes visible.
pub async fn reveal(state: &SharedState, top: u32) -> Result<ActionResponse, ServiceError> {
    state
        .run_exclusive("reveal", move || async move {
            let store = state.require_store().await?;
            ensure_play_open(state)?;
            let (question_id, _) = state
                .mirror()
                .current_question()
                .ok_or_else(|| ServiceError::InvalidState("no current question".into()))?;

            let key = question_key(&question_id);
            let document = with_retry("read question", || store.get(key.clone()))
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("question {key} does not exist")))?;
            let mut entity: QuestionEntity = document.decode()?;

            let answer = entity
                .answers
                .iter_mut()
                .find(|answer| answer.top == top)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("question {question_id} has no answer {top}"))
                })?;
            answer.revealed = !answer.revealed;
            let revealed = answer.revealed;

            let fields = answers_fields(&entity.answers)?;
            with_retry("write answers", || {
                store.update_fields(key.clone(), fields.clone())
            })
            .await?;
            info!(question = %question_id, top, revealed, "answer toggled");

            if revealed {
                state.answers().publish(AnswerEvent::new(
                    AnswerValue::Correct,
                    Some(question_id.clone()),
                ));
            }

            state
                .settle_questions("reveal", move |set| {
                    set.current()
                        .filter(|(id, _)| *id == question_id)
                        .and_then(|(_, question)| question.answer(top))
                        .is_some_and(|answer| answer.revealed == revealed)
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

/// Signal a wrong answer to every view. No document is touched.
pub async fn wrong_answer(state: &SharedState) -> Result<ActionResponse, ServiceError> {
    state
        .run_exclusive("wrong_answer", move || async move {
            ensure_play_open(state)?;
            let question_id = state.mirror().current_question().map(|(id, _)| id);
            let delivered = state
                .answers()
                .publish(AnswerEvent::new(AnswerValue::Wrong, question_id));
            info!(delivered, "wrong answer signalled");
            Ok(())
        })
        .await?;

    Ok(ActionResponse {
        outcome: ActionOutcome::Applied,
        view: controls_view(state),
    })
}
