//! Process-wide mirror of the shared game documents.
//!
//! Initialization order: the `game/state` document is followed first, and the
//! question query is only opened once a round is known. Phase, round and the
//! question set are published on three independent watch channels so a phase
//! flip never forces the question set to be re-derived.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        doc_store::{ChangeBatch, ChangeKind, DocumentStore, Filter, Subscription},
        models::{GameStateEntity, QUESTION_COLLECTION, game_state_key},
        storage::StorageResult,
    },
    state::{
        game::{GamePhase, GameState, Question, Round},
        questions::QuestionSet,
    },
};

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(10);

struct MirrorChannels {
    phase: watch::Sender<Option<GamePhase>>,
    round: watch::Sender<Option<Round>>,
    questions: watch::Sender<QuestionSet>,
}

/// Live, read-only reflection of the game state and the current round's questions.
pub struct GameMirror {
    channels: Arc<MirrorChannels>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for GameMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl GameMirror {
    /// Create a detached mirror with every field unknown.
    pub fn new() -> Self {
        let (phase, _) = watch::channel(None);
        let (round, _) = watch::channel(None);
        let (questions, _) = watch::channel(QuestionSet::default());
        Self {
            channels: Arc::new(MirrorChannels {
                phase,
                round,
                questions,
            }),
            task: Mutex::new(None),
        }
    }

    /// Start following `store`, replacing any previous follower.
    pub async fn attach(&self, store: Arc<dyn DocumentStore>) {
        let channels = self.channels.clone();
        let handle = tokio::spawn(run(store, channels));
        let mut guard = self.task.lock().await;
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    /// Stop following the store; the last mirrored values stay readable.
    pub async fn detach(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    /// Last known lifecycle phase.
    pub fn phase(&self) -> Option<GamePhase> {
        *self.channels.phase.borrow()
    }

    /// Last known round.
    pub fn round(&self) -> Option<Round> {
        *self.channels.round.borrow()
    }

    /// Phase and round, when both are known.
    pub fn game_state(&self) -> Option<GameState> {
        Some(GameState {
            phase: self.phase()?,
            round: self.round()?,
        })
    }

    /// Snapshot of the current round's question set.
    pub fn questions(&self) -> QuestionSet {
        self.channels.questions.borrow().clone()
    }

    /// Document id and content of the current question.
    pub fn current_question(&self) -> Option<(String, Question)> {
        let set = self.channels.questions.borrow();
        set.current()
            .map(|(id, question)| (id.to_owned(), question.clone()))
    }

    /// Watch lifecycle phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<Option<GamePhase>> {
        self.channels.phase.subscribe()
    }

    /// Watch round changes.
    pub fn subscribe_round(&self) -> watch::Receiver<Option<Round>> {
        self.channels.round.subscribe()
    }

    /// Watch question set changes.
    pub fn subscribe_questions(&self) -> watch::Receiver<QuestionSet> {
        self.channels.questions.subscribe()
    }

    /// Wait until the question set satisfies `predicate`, at most `limit`.
    pub async fn settle_questions<F>(&self, limit: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&QuestionSet) -> bool,
    {
        let mut receiver = self.channels.questions.subscribe();
        matches!(
            timeout(limit, receiver.wait_for(|set| predicate(set))).await,
            Ok(Ok(_))
        )
    }

    /// Wait until phase and round satisfy `predicate`, at most `limit`.
    pub async fn settle_game<F>(&self, limit: Duration, mut predicate: F) -> bool
    where
        F: FnMut(Option<GamePhase>, Option<Round>) -> bool,
    {
        let mut phase_rx = self.channels.phase.subscribe();
        let mut round_rx = self.channels.round.subscribe();

        let wait = async {
            loop {
                let phase = *phase_rx.borrow_and_update();
                let round = *round_rx.borrow_and_update();
                if predicate(phase, round) {
                    return true;
                }
                tokio::select! {
                    changed = phase_rx.changed() => if changed.is_err() { return false },
                    changed = round_rx.changed() => if changed.is_err() { return false },
                }
            }
        };

        timeout(limit, wait).await.unwrap_or(false)
    }
}

/// Follow the store forever, resubscribing with backoff whenever a feed ends.
async fn run(store: Arc<dyn DocumentStore>, channels: Arc<MirrorChannels>) {
    let mut delay = INITIAL_DELAY;
    loop {
        match follow(&store, &channels, &mut delay).await {
            Ok(()) => warn!("mirror feed closed; resubscribing"),
            Err(err) => warn!(error = %err, "mirror subscription failed; retrying"),
        }
        sleep(delay).await;
        delay = next_delay(delay);
    }
}

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_DELAY)
}

async fn follow(
    store: &Arc<dyn DocumentStore>,
    channels: &MirrorChannels,
    delay: &mut Duration,
) -> StorageResult<()> {
    let mut game_feed = store.subscribe_document(game_state_key()).await?;
    *delay = INITIAL_DELAY;
    info!("mirror following game state");

    let mut question_feed: Option<Subscription> = None;
    let mut followed_round: Option<Round> = None;

    loop {
        tokio::select! {
            batch = game_feed.next() => {
                let Some(batch) = batch else { return Ok(()) };
                let round = channels.apply_game_batch(&batch);

                if round != followed_round || question_feed.is_none() {
                    // Release the previous round before anything else so none of
                    // its deltas can be folded into the new set.
                    if let Some(previous) = question_feed.take() {
                        previous.release();
                    }
                    followed_round = round;
                    match round {
                        Some(round) => {
                            channels.questions.send_replace(QuestionSet::for_round(round));
                            let filter = Filter::all().eq("round", round.get());
                            question_feed = Some(
                                store
                                    .subscribe_query(QUESTION_COLLECTION.to_owned(), filter)
                                    .await?,
                            );
                            debug!(%round, "following questions of round");
                        }
                        None => {
                            channels.questions.send_replace(QuestionSet::default());
                        }
                    }
                }
            }
            batch = next_batch(&mut question_feed) => {
                let Some(batch) = batch else { return Ok(()) };
                channels.questions.send_modify(|set| set.apply_batch(&batch));
            }
        }
    }
}

async fn next_batch(feed: &mut Option<Subscription>) -> Option<ChangeBatch> {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

impl MirrorChannels {
    /// Fold a game state batch and publish phase and round independently.
    /// Returns the round to follow afterwards.
    fn apply_game_batch(&self, batch: &ChangeBatch) -> Option<Round> {
        let mut state = self.current_state();

        for change in batch {
            if change.kind == ChangeKind::Removed {
                state = None;
                continue;
            }
            match change.document.decode::<GameStateEntity>() {
                Ok(entity) => match GameState::try_from(entity) {
                    Ok(decoded) => state = Some(decoded),
                    Err(err) => warn!(error = %err, "ignoring invalid game state"),
                },
                Err(err) => warn!(error = %err, "ignoring malformed game state document"),
            }
        }

        let phase = state.map(|s| s.phase);
        let round = state.map(|s| s.round);
        self.phase.send_if_modified(|current| replace_if_changed(current, phase));
        self.round.send_if_modified(|current| replace_if_changed(current, round));
        round
    }

    fn current_state(&self) -> Option<GameState> {
        Some(GameState {
            phase: (*self.phase.borrow())?,
            round: (*self.round.borrow())?,
        })
    }
}

fn replace_if_changed<T: PartialEq>(current: &mut T, next: T) -> bool {
    if *current == next {
        false
    } else {
        *current = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dao::{
        doc_store::{DocKey, Fields, memory::MemoryStore, to_fields},
        models::question_key,
    };

    const LIMIT: Duration = Duration::from_secs(2);

    fn fields(value: serde_json::Value) -> Fields {
        to_fields(&value).unwrap()
    }

    async fn seed(store: &MemoryStore, round: u8) {
        store
            .put(game_state_key(), fields(json!({"state": 0, "round": round})))
            .await
            .unwrap();
        for (round, number) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
            store
                .put(
                    question_key(format!("r{round}q{number}")),
                    fields(json!({
                        "number": number,
                        "question": "?",
                        "answers": [],
                        "active": number == 1,
                        "round": round,
                    })),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn mirrors_state_and_current_question() {
        let store = MemoryStore::new();
        seed(&store, 1).await;
        let mirror = GameMirror::new();
        mirror.attach(Arc::new(store.clone())).await;

        assert!(
            mirror
                .settle_questions(LIMIT, |set| set.current_id() == Some("r1q1"))
                .await
        );
        assert_eq!(mirror.phase(), Some(GamePhase::Lobby));
        assert_eq!(mirror.round(), Some(Round::FIRST));
        assert_eq!(mirror.questions().len(), 2);
    }

    #[tokio::test]
    async fn round_change_resubscribes_and_releases_previous_feed() {
        let store = MemoryStore::new();
        seed(&store, 1).await;
        let mirror = GameMirror::new();
        mirror.attach(Arc::new(store.clone())).await;
        assert!(mirror.settle_questions(LIMIT, |set| set.is_loaded()).await);
        assert_eq!(store.subscriber_count(), 2);

        store
            .update_fields(game_state_key(), fields(json!({"round": 2})))
            .await
            .unwrap();

        assert!(
            mirror
                .settle_questions(LIMIT, |set| set.current_id() == Some("r2q1"))
                .await
        );
        assert_eq!(mirror.round(), Round::new(2).ok());
        assert_eq!(store.subscriber_count(), 2);

        // Round 1 deltas are no longer folded.
        store
            .update_fields(question_key("r1q2"), fields(json!({"active": true})))
            .await
            .unwrap();
        store
            .update_fields(question_key("r2q2"), fields(json!({"question": "!"})))
            .await
            .unwrap();
        assert!(
            mirror
                .settle_questions(LIMIT, |set| set
                    .ordered()
                    .iter()
                    .any(|(_, q)| q.question == "!"))
                .await
        );
        assert_eq!(mirror.questions().current_id(), Some("r2q1"));
    }

    #[tokio::test]
    async fn phase_updates_leave_question_set_untouched() {
        let store = MemoryStore::new();
        seed(&store, 1).await;
        let mirror = GameMirror::new();
        mirror.attach(Arc::new(store.clone())).await;
        assert!(mirror.settle_questions(LIMIT, |set| set.is_loaded()).await);

        let mut questions_rx = mirror.subscribe_questions();
        questions_rx.borrow_and_update();

        store
            .update_fields(game_state_key(), fields(json!({"state": 1})))
            .await
            .unwrap();
        assert!(
            mirror
                .settle_game(LIMIT, |phase, _| phase == Some(GamePhase::Active))
                .await
        );
        assert!(!questions_rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn missing_game_state_keeps_everything_unknown() {
        let store = MemoryStore::new();
        let mirror = GameMirror::new();
        mirror.attach(Arc::new(store.clone())).await;

        assert!(
            !mirror
                .settle_game(Duration::from_millis(100), |phase, round| phase.is_some()
                    || round.is_some())
                .await
        );
        assert_eq!(mirror.game_state(), None);
        assert_eq!(mirror.current_question(), None);

        store
            .put(
                DocKey::new("game", "state"),
                fields(json!({"state": 2, "round": 3})),
            )
            .await
            .unwrap();
        assert!(
            mirror
                .settle_game(LIMIT, |phase, round| phase == Some(GamePhase::Ended)
                    && round == Round::new(3).ok())
                .await
        );
    }

    #[test]
    fn resubscription_backoff_doubles_up_to_ten_seconds() {
        let delays: Vec<u64> = std::iter::successors(Some(INITIAL_DELAY), |d| Some(next_delay(*d)))
            .take(6)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[tokio::test]
    async fn detach_releases_store_subscriptions() {
        let store = MemoryStore::new();
        seed(&store, 1).await;
        let mirror = GameMirror::new();
        mirror.attach(Arc::new(store.clone())).await;
        assert!(mirror.settle_questions(LIMIT, |set| set.is_loaded()).await);

        mirror.detach().await;
        tokio::task::yield_now().await;
        // Aborted tasks drop their subscriptions once the runtime polls them again.
        for _ in 0..50 {
            if store.subscriber_count() == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(mirror.round(), Some(Round::FIRST));
    }
}
