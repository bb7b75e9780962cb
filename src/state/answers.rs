use std::time::SystemTime;

use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

/// Feedback kind triggered by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnswerValue {
    /// An answer was revealed.
    Correct,
    /// The contestant gave a wrong answer.
    Wrong,
}

/// Transient feedback signal delivered to every connected view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AnswerEvent {
    /// Unique identifier of the signal.
    pub id: Uuid,
    /// Feedback kind.
    pub value: AnswerValue,
    /// Question that was current when the signal was emitted.
    pub question_id: Option<String>,
    /// RFC 3339 emission timestamp.
    pub emitted_at: String,
}

impl AnswerEvent {
    /// Build a new event stamped with the current time.
    pub fn new(value: AnswerValue, question_id: Option<String>) -> Self {
        let emitted_at = OffsetDateTime::from(SystemTime::now())
            .format(&Rfc3339)
            .unwrap_or_else(|_| "invalid-timestamp".into());
        Self {
            id: Uuid::new_v4(),
            value,
            question_id,
            emitted_at,
        }
    }
}

/// In-process pub/sub channel for answer feedback.
///
/// Events are never persisted: subscribers connected at emission time each get
/// the event once, late subscribers never see it.
pub struct AnswerBus {
    sender: broadcast::Sender<AnswerEvent>,
}

impl AnswerBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<AnswerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many subscribers received it.
    pub fn publish(&self, event: AnswerEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}
