mod common;

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use survey_board_back::{
    config::AppConfig,
    dao::{
        doc_store::{
            DocKey, Document, DocumentStore, Fields, Filter, Subscription, memory::MemoryStore,
        },
        models::game_state_key,
        storage::StorageResult,
    },
    dto::controls::ActionOutcome,
    error::ServiceError,
    services::{board_service, lifecycle_service, navigation_service, reveal_service},
    state::{
        answers::AnswerValue,
        game::{GamePhase, Round},
    },
};
use tokio::sync::broadcast::error::TryRecvError;

use common::{
    attach_with, catalogue, fixture, question, round_snapshot, seed_store, stored_game,
    stored_question, test_config,
};

const LOBBY: u8 = 0;
const ACTIVE: u8 = 1;
const ENDED: u8 = 2;

#[tokio::test]
async fn reset_round_leaves_only_question_one_active_and_everything_hidden() {
    let mut questions = catalogue();
    for entity in questions.iter_mut().filter(|q| q.round == 2) {
        entity.active = entity.number == 3;
        for answer in &mut entity.answers {
            answer.revealed = true;
        }
    }
    let fx = fixture(ACTIVE, 1, questions).await;

    navigation_service::reset_round(&fx.state, Some(Round::new(2).unwrap()))
        .await
        .unwrap();

    for entity in round_snapshot(&fx.store, 2).await {
        assert_eq!(entity.active, entity.number == 1);
        assert!(entity.answers.iter().all(|answer| !answer.revealed));
    }
    // Round 1 untouched.
    assert!(stored_question(&fx.store, 1, 1).await.active);
}

#[tokio::test]
async fn advancing_walks_the_round_until_the_last_question() {
    let fx = fixture(ACTIVE, 1, catalogue()).await;

    for expected in 2..=3 {
        let response = navigation_service::advance(&fx.state).await.unwrap();
        let current = response.view.question.expect("current question");
        assert_eq!(current.number, expected);

        let snapshot = round_snapshot(&fx.store, 1).await;
        let active: Vec<_> = snapshot.iter().filter(|q| q.active).map(|q| q.number).collect();
        assert_eq!(active, vec![expected]);
    }

    assert!(!fx.state.mirror().questions().is_empty());
    let guards = board_service::controls_view(&fx.state).guards;
    assert!(!guards.can_advance);
    assert!(guards.can_retreat);

    let before = round_snapshot(&fx.store, 1).await;
    assert!(matches!(
        navigation_service::advance(&fx.state).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert_eq!(round_snapshot(&fx.store, 1).await, before);
}

#[tokio::test]
async fn retreating_from_question_one_changes_nothing() {
    let fx = fixture(ACTIVE, 1, catalogue()).await;
    let before = round_snapshot(&fx.store, 1).await;

    assert!(matches!(
        navigation_service::retreat(&fx.state).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert_eq!(round_snapshot(&fx.store, 1).await, before);
}

#[tokio::test]
async fn retreat_stays_within_the_round() {
    let mut questions = catalogue();
    for entity in questions.iter_mut().filter(|q| q.round == 1) {
        entity.active = entity.number == 2;
    }
    let fx = fixture(ACTIVE, 1, questions).await;

    navigation_service::retreat(&fx.state).await.unwrap();

    assert!(stored_question(&fx.store, 1, 1).await.active);
    assert!(!stored_question(&fx.store, 1, 2).await.active);
    // Question 1 of round 2 was already active and must not be touched either way.
    assert!(stored_question(&fx.store, 2, 1).await.active);
    assert!(!stored_question(&fx.store, 2, 2).await.active);
}

#[tokio::test]
async fn navigation_is_locked_in_the_lobby() {
    let fx = fixture(LOBBY, 1, catalogue()).await;
    let before = round_snapshot(&fx.store, 1).await;

    assert!(matches!(
        navigation_service::advance(&fx.state).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert!(matches!(
        reveal_service::reveal(&fx.state, 1).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert!(matches!(
        reveal_service::wrong_answer(&fx.state).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert_eq!(round_snapshot(&fx.store, 1).await, before);
}

#[tokio::test]
async fn revealing_twice_restores_the_flag_and_signals_once() {
    let fx = fixture(ACTIVE, 1, catalogue()).await;
    let mut answers = fx.state.answers().subscribe();

    reveal_service::reveal(&fx.state, 2).await.unwrap();
    assert!(stored_question(&fx.store, 1, 1).await.answers[1].revealed);

    reveal_service::reveal(&fx.state, 2).await.unwrap();
    assert!(!stored_question(&fx.store, 1, 1).await.answers[1].revealed);

    let event = answers.try_recv().unwrap();
    assert_eq!(event.value, AnswerValue::Correct);
    assert_eq!(event.question_id.as_deref(), Some("r1-q1"));
    assert!(matches!(answers.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn revealing_an_unknown_rank_is_not_found() {
    let fx = fixture(ACTIVE, 1, catalogue()).await;
    assert!(matches!(
        reveal_service::reveal(&fx.state, 9).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn changing_round_always_lands_in_the_lobby() {
    for phase in [LOBBY, ACTIVE, ENDED] {
        let fx = fixture(phase, 1, catalogue()).await;

        let response = lifecycle_service::change_round(&fx.state, Round::new(3).unwrap())
            .await
            .unwrap();
        assert_eq!(response.outcome, ActionOutcome::Applied);

        let game = stored_game(&fx.store).await;
        assert_eq!((game.state, game.round), (LOBBY, 3));
        assert_eq!(fx.state.mirror().phase(), Some(GamePhase::Lobby));
        assert_eq!(fx.state.mirror().round(), Round::new(3).ok());
    }
}

#[tokio::test]
async fn reveal_advance_and_wrong_answer_scenario() {
    let questions = vec![
        question(1, 1, true, &[1, 2]),
        question(1, 2, false, &[1, 2]),
    ];
    let fx = fixture(ACTIVE, 1, questions).await;
    let mut answers = fx.state.answers().subscribe();

    reveal_service::reveal(&fx.state, 1).await.unwrap();
    let first = stored_question(&fx.store, 1, 1).await;
    assert!(first.answers[0].revealed);
    assert!(!first.answers[1].revealed);
    assert_eq!(answers.try_recv().unwrap().value, AnswerValue::Correct);

    navigation_service::advance(&fx.state).await.unwrap();
    assert!(!stored_question(&fx.store, 1, 1).await.active);
    assert!(stored_question(&fx.store, 1, 2).await.active);

    let before = (
        stored_question(&fx.store, 1, 1).await,
        stored_question(&fx.store, 1, 2).await,
    );
    reveal_service::wrong_answer(&fx.state).await.unwrap();
    let wrong = answers.try_recv().unwrap();
    assert_eq!(wrong.value, AnswerValue::Wrong);
    assert_eq!(wrong.question_id.as_deref(), Some("r1-q2"));
    assert!(matches!(answers.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(
        (
            stored_question(&fx.store, 1, 1).await,
            stored_question(&fx.store, 1, 2).await,
        ),
        before
    );
}

#[tokio::test]
async fn stopping_the_game_rewinds_the_round_and_ends() {
    let mut questions = catalogue();
    for entity in questions.iter_mut().filter(|q| q.round == 2) {
        entity.active = entity.number == 2;
        entity.answers[0].revealed = true;
    }
    let fx = fixture(ACTIVE, 2, questions).await;

    let response = lifecycle_service::stop_game(&fx.state, true).await.unwrap();
    assert_eq!(response.outcome, ActionOutcome::Applied);

    let game = stored_game(&fx.store).await;
    assert_eq!((game.state, game.round), (ENDED, 2));
    for entity in round_snapshot(&fx.store, 2).await {
        assert_eq!(entity.active, entity.number == 1);
        assert!(entity.answers.iter().all(|answer| !answer.revealed));
    }
    assert_eq!(response.view.game.phase, Some(GamePhase::Ended));
}

#[tokio::test]
async fn declined_confirmations_write_nothing() {
    let fx = fixture(ACTIVE, 1, catalogue()).await;

    let response = lifecycle_service::stop_game(&fx.state, false).await.unwrap();
    assert_eq!(response.outcome, ActionOutcome::Declined);
    let stopped = lifecycle_service::start_or_stop_round(&fx.state, false)
        .await
        .unwrap();
    assert_eq!(stopped.outcome, ActionOutcome::Declined);

    let game = stored_game(&fx.store).await;
    assert_eq!((game.state, game.round), (ACTIVE, 1));
}

#[tokio::test]
async fn round_toggle_and_new_game_follow_the_lifecycle() {
    let fx = fixture(LOBBY, 1, catalogue()).await;

    lifecycle_service::start_or_stop_round(&fx.state, false)
        .await
        .unwrap();
    assert_eq!(stored_game(&fx.store).await.state, ACTIVE);

    navigation_service::advance(&fx.state).await.unwrap();
    lifecycle_service::start_or_stop_round(&fx.state, true)
        .await
        .unwrap();
    assert_eq!(stored_game(&fx.store).await.state, LOBBY);
    assert!(stored_question(&fx.store, 1, 1).await.active);

    assert!(matches!(
        lifecycle_service::start_game(&fx.state, true).await,
        Err(ServiceError::InvalidState(_))
    ));
    lifecycle_service::stop_game(&fx.state, true).await.unwrap();
    assert!(matches!(
        lifecycle_service::start_or_stop_round(&fx.state, true).await,
        Err(ServiceError::InvalidState(_))
    ));
    lifecycle_service::start_game(&fx.state, true).await.unwrap();
    let game = stored_game(&fx.store).await;
    assert_eq!((game.state, game.round), (LOBBY, 1));
}

#[tokio::test]
async fn writes_fail_fast_while_degraded() {
    let fx = fixture(ACTIVE, 1, catalogue()).await;
    fx.state.clear_store().await;

    assert!(matches!(
        navigation_service::advance(&fx.state).await,
        Err(ServiceError::Degraded)
    ));
    // Reads keep the last mirrored values.
    assert!(fx.state.mirror().current_question().is_some());
}

#[tokio::test]
async fn nothing_moves_without_a_current_question() {
    let mut questions = catalogue();
    for entity in questions.iter_mut().filter(|q| q.round == 2) {
        entity.active = false;
    }
    let fx = fixture(ACTIVE, 2, questions).await;
    assert!(fx.state.mirror().current_question().is_none());
    let before = round_snapshot(&fx.store, 2).await;

    assert!(matches!(
        navigation_service::advance(&fx.state).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert!(matches!(
        navigation_service::retreat(&fx.state).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert!(matches!(
        reveal_service::reveal(&fx.state, 1).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert_eq!(round_snapshot(&fx.store, 2).await, before);
}

/// Memory store whose writes touching the game state document are slow.
#[derive(Clone)]
struct SlowGameWrites {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowGameWrites {
    fn delayed<T: Send + 'static>(
        &self,
        touches_game: bool,
        write: BoxFuture<'static, StorageResult<T>>,
    ) -> BoxFuture<'static, StorageResult<T>> {
        let delay = self.delay;
        Box::pin(async move {
            if touches_game {
                tokio::time::sleep(delay).await;
            }
            write.await
        })
    }
}

impl DocumentStore for SlowGameWrites {
    fn get(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        self.inner.get(key)
    }

    fn query(
        &self,
        collection: String,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        self.inner.query(collection, filter)
    }

    fn update_fields(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let touches_game = key == game_state_key();
        self.delayed(touches_game, self.inner.update_fields(key, fields))
    }

    fn update_many(
        &self,
        updates: Vec<(DocKey, Fields)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let touches_game = updates.iter().any(|(key, _)| *key == game_state_key());
        self.delayed(touches_game, self.inner.update_many(updates))
    }

    fn put(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.put(key, fields)
    }

    fn subscribe_document(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Subscription>> {
        self.inner.subscribe_document(key)
    }

    fn subscribe_query(
        &self,
        collection: String,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Subscription>> {
        self.inner.subscribe_query(collection, filter)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

#[tokio::test]
async fn a_slow_store_never_leaves_a_transition_half_applied() {
    let mut questions = catalogue();
    for entity in questions.iter_mut().filter(|q| q.round == 1) {
        entity.active = entity.number == 2;
        entity.answers[0].revealed = true;
    }
    let store = seed_store(ACTIVE, 1, questions).await;
    let slow = SlowGameWrites {
        inner: store.clone(),
        delay: Duration::from_millis(400),
    };
    let config = AppConfig {
        operation_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let state = attach_with(Arc::new(slow), config, 1).await;

    let response = lifecycle_service::stop_game(&state, true).await.unwrap();
    assert_eq!(response.outcome, ActionOutcome::Applied);

    let game = stored_game(&store).await;
    assert_eq!((game.state, game.round), (ENDED, 1));
    for entity in round_snapshot(&store, 1).await {
        assert_eq!(entity.active, entity.number == 1);
        assert!(entity.answers.iter().all(|answer| !answer.revealed));
    }
}
