use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Fan-out of SSE payloads to every open stream of one kind.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers; nobody listening is not an error.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

/// Why a controls token was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeatRejection {
    #[error("another controls stream is already active")]
    Occupied,
    #[error("controls stream not opened yet")]
    Vacant,
    #[error("invalid controls token")]
    Mismatch,
}

/// The single operator seat. Whoever holds the token issued by [`claim`](Self::claim)
/// may drive the game until the seat is released.
#[derive(Default)]
pub struct OperatorSeat {
    token: Mutex<Option<String>>,
}

impl OperatorSeat {
    /// Take the seat, returning the token the operator must present.
    pub async fn claim(&self) -> Result<String, SeatRejection> {
        let mut guard = self.token.lock().await;
        if guard.is_some() {
            return Err(SeatRejection::Occupied);
        }
        let token = Uuid::new_v4().simple().to_string();
        *guard = Some(token.clone());
        Ok(token)
    }

    pub async fn verify(&self, provided: &str) -> Result<(), SeatRejection> {
        match self.token.lock().await.as_deref() {
            Some(token) if token == provided => Ok(()),
            Some(_) => Err(SeatRejection::Mismatch),
            None => Err(SeatRejection::Vacant),
        }
    }

    /// Free the seat if `token` still holds it. Returns whether it was freed.
    pub async fn release(&self, token: &str) -> bool {
        let mut guard = self.token.lock().await;
        if guard.as_deref() == Some(token) {
            guard.take();
            true
        } else {
            false
        }
    }

    pub async fn is_taken(&self) -> bool {
        self.token.lock().await.is_some()
    }
}

/// Controls hub plus the seat of its single subscriber.
pub struct ControlsChannel {
    hub: SseHub,
    seat: OperatorSeat,
}

impl ControlsChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: SseHub::new(capacity),
            seat: OperatorSeat::default(),
        }
    }

    pub fn hub(&self) -> &SseHub {
        &self.hub
    }

    pub fn seat(&self) -> &OperatorSeat {
        &self.seat
    }
}
