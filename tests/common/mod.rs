#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use survey_board_back::{
    config::AppConfig,
    dao::{
        doc_store::{DocumentStore, memory::MemoryStore, to_fields},
        models::{AnswerEntity, GameStateEntity, QuestionEntity, game_state_key, question_key},
    },
    state::{AppState, SharedState, game::Round},
};

pub const SYNC: Duration = Duration::from_secs(2);

pub struct Fixture {
    pub state: SharedState,
    pub store: MemoryStore,
}

pub fn question_id(round: u8, number: u32) -> String {
    format!("r{round}-q{number}")
}

pub fn question(round: u8, number: u32, active: bool, tops: &[u32]) -> QuestionEntity {
    QuestionEntity {
        number,
        question: format!("round {round} question {number}"),
        answers: tops
            .iter()
            .map(|top| AnswerEntity {
                top: *top,
                title: format!("answer {top}"),
                score: 10 * *top as i32,
                revealed: false,
            })
            .collect(),
        active,
        round,
    }
}

/// Three questions per round, question 1 active everywhere.
pub fn catalogue() -> Vec<QuestionEntity> {
    (1..=3)
        .flat_map(|round| (1..=3).map(move |number| question(round, number, number == 1, &[1, 2, 3])))
        .collect()
}

pub async fn seed_store(phase: u8, round: u8, questions: Vec<QuestionEntity>) -> MemoryStore {
    let store = MemoryStore::new();
    store
        .put(
            game_state_key(),
            to_fields(&GameStateEntity {
                state: phase,
                round,
            })
            .unwrap(),
        )
        .await
        .unwrap();
    for entity in questions {
        store
            .put(
                question_key(question_id(entity.round, entity.number)),
                to_fields(&entity).unwrap(),
            )
            .await
            .unwrap();
    }
    store
}

pub fn test_config() -> AppConfig {
    AppConfig {
        seed_path: None,
        ..AppConfig::default()
    }
}

/// State attached to `store`, returned once the mirror holds `round`'s questions.
pub async fn attach(store: &MemoryStore, round: u8) -> SharedState {
    attach_with(Arc::new(store.clone()), test_config(), round).await
}

/// Like [`attach`], for any store and configuration.
pub async fn attach_with(
    store: Arc<dyn DocumentStore>,
    config: AppConfig,
    round: u8,
) -> SharedState {
    let state = AppState::new(config);
    state.install_store(store).await;

    let expected = Round::new(round).unwrap();
    assert!(
        state
            .mirror()
            .settle_questions(SYNC, |set| set.round() == Some(expected) && set.is_loaded())
            .await,
        "mirror never loaded round {round}"
    );
    state
}

pub async fn fixture(phase: u8, round: u8, questions: Vec<QuestionEntity>) -> Fixture {
    let store = seed_store(phase, round, questions).await;
    let state = attach(&store, round).await;
    Fixture { state, store }
}

pub async fn stored_question(store: &MemoryStore, round: u8, number: u32) -> QuestionEntity {
    store
        .get(question_key(question_id(round, number)))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap()
}

pub async fn stored_game(store: &MemoryStore) -> GameStateEntity {
    store
        .get(game_state_key())
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap()
}

pub async fn round_snapshot(store: &MemoryStore, round: u8) -> Vec<QuestionEntity> {
    let mut questions = Vec::new();
    for number in 1..=3 {
        questions.push(stored_question(store, round, number).await);
    }
    questions
}
