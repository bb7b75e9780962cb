use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::answers::{AnswerEvent, AnswerValue};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name.
    pub event: Option<String>,
    /// Serialized data field.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First event of the controls stream carrying the operator token.
pub struct ControlsHandshake {
    /// Value to send back in the `X-Controls-Token` header.
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

/// Answer feedback forwarded to the views.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnswerFeedbackEvent {
    pub id: Uuid,
    pub value: AnswerValue,
    pub question_id: Option<String>,
    pub emitted_at: String,
    /// How long the board flashes, set for wrong answers.
    pub flash_ms: Option<u64>,
}

impl AnswerFeedbackEvent {
    /// Wrap a bus event, attaching the flash duration to wrong answers.
    pub fn new(event: AnswerEvent, wrong_flash_ms: u64) -> Self {
        let flash_ms = (event.value == AnswerValue::Wrong).then_some(wrong_flash_ms);
        Self {
            id: event.id,
            value: event.value,
            question_id: event.question_id,
            emitted_at: event.emitted_at,
            flash_ms,
        }
    }
}
