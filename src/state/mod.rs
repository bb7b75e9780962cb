pub mod answers;
pub mod game;
pub mod mirror;
pub mod questions;
mod sse;
pub mod state_machine;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{config::AppConfig, dao::doc_store::DocumentStore, error::ServiceError};

pub use self::sse::{ControlsChannel, OperatorSeat, SeatRejection, SseHub};
use self::{
    answers::AnswerBus,
    game::{GamePhase, Round},
    mirror::GameMirror,
    questions::QuestionSet,
};

/// Cheaply clonable handle on the process-wide state.
pub type SharedState = Arc<AppState>;

const ANSWER_BUS_CAPACITY: usize = 32;
const SSE_CAPACITY: usize = 32;

/// Central application state: store handle, mirror, streams and the writer gate.
pub struct AppState {
    store: RwLock<Option<Arc<dyn DocumentStore>>>,
    mirror: GameMirror,
    board_sse: SseHub,
    controls: ControlsChannel,
    answers: AnswerBus,
    degraded: watch::Sender<bool>,
    operation_gate: Mutex<()>,
    operation_timeout: Option<Duration>,
    config: Arc<AppConfig>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let operation_timeout = Some(config.operation_timeout);
        Arc::new(Self {
            store: RwLock::new(None),
            mirror: GameMirror::new(),
            board_sse: SseHub::new(SSE_CAPACITY),
            controls: ControlsChannel::new(SSE_CAPACITY),
            answers: AnswerBus::new(ANSWER_BUS_CAPACITY),
            degraded: degraded_tx,
            operation_gate: Mutex::new(()),
            operation_timeout,
            config: Arc::new(config),
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn DocumentStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] when none is usable.
    pub async fn require_store(&self) -> Result<Arc<dyn DocumentStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store, point the mirror at it and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn DocumentStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store.clone());
        }
        self.mirror.attach(store).await;
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    ///
    /// The mirror keeps its last values so views stay readable.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.mirror.detach().await;
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, notifying watchers only on change.
    pub fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            info!(degraded = value, "degraded mode changed");
        }
    }

    /// Mirror of the game state and the current round's questions.
    pub fn mirror(&self) -> &GameMirror {
        &self.mirror
    }

    /// Transient answer feedback channel.
    pub fn answers(&self) -> &AnswerBus {
        &self.answers
    }

    /// Broadcast hub used for the board SSE stream.
    pub fn board_sse(&self) -> &SseHub {
        &self.board_sse
    }

    /// Broadcast hub used for the controls SSE stream.
    pub fn controls_sse(&self) -> &SseHub {
        self.controls.hub()
    }

    /// Seat held by the single connected operator.
    pub fn controls_seat(&self) -> &OperatorSeat {
        self.controls.seat()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Wait for the mirrored question set to reflect a write.
    pub async fn settle_questions<F>(&self, operation: &'static str, predicate: F)
    where
        F: FnMut(&QuestionSet) -> bool,
    {
        let limit = self.config.settle_timeout;
        if !self.mirror.settle_questions(limit, predicate).await {
            warn!(operation, "questions did not settle in time");
        }
    }

    /// Wait for the mirrored phase and round to reflect a write.
    pub async fn settle_game<F>(&self, operation: &'static str, predicate: F)
    where
        F: FnMut(Option<GamePhase>, Option<Round>) -> bool,
    {
        let limit = self.config.settle_timeout;
        if !self.mirror.settle_game(limit, predicate).await {
            warn!(operation, "game state did not settle in time");
        }
    }

    /// Run a controller operation as the single logical writer.
    ///
    /// Operations are serialized through one gate. The operation timeout bounds the
    /// wait for the gate only; admitted work always runs to completion.
    pub async fn run_exclusive<F, Fut, T>(
        &self,
        operation: &'static str,
        work: F,
    ) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let gate = match self.operation_timeout {
            Some(limit) => match timeout(limit, self.operation_gate.lock()).await {
                Ok(gate) => gate,
                Err(_) => {
                    warn!(operation, "controller busy; operation timed out");
                    return Err(ServiceError::Timeout);
                }
            },
            None => self.operation_gate.lock().await,
        };

        let outcome = work().await;
        drop(gate);
        if let Err(err) = &outcome {
            warn!(operation, error = %err, "controller operation rejected");
        }
        outcome
    }
}
