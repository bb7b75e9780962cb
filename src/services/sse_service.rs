use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::sse::{ControlsHandshake, ServerEvent, SystemStatus},
    error::ServiceError,
    services::sse_events,
    state::SharedState,
};

const EVENT_CONTROLS_TOKEN: &str = "controls_token";

/// Subscribe to the board stream; the receiver is paired with the current snapshot.
pub fn subscribe_board(state: &SharedState) -> (broadcast::Receiver<ServerEvent>, Vec<ServerEvent>) {
    // Subscribe before building the snapshot so no update falls in between.
    let receiver = state.board_sse().subscribe();
    let snapshot = [
        sse_events::game_state_event(state),
        sse_events::board_question_event(state),
        system_status_event(state),
    ]
    .into_iter()
    .flatten()
    .collect();
    (receiver, snapshot)
}

/// An operator stream that owns the controls seat.
pub struct ControlsSubscription {
    pub receiver: broadcast::Receiver<ServerEvent>,
    pub snapshot: Vec<ServerEvent>,
    pub token: String,
}

/// Subscribe to the controls stream, claiming the single operator seat.
pub async fn subscribe_controls(state: &SharedState) -> Result<ControlsSubscription, ServiceError> {
    let token = state
        .controls_seat()
        .claim()
        .await
        .map_err(|err| ServiceError::Unauthorized(err.to_string()))?;
    let receiver = state.controls_sse().subscribe();

    let handshake = ServerEvent::json(
        Some(EVENT_CONTROLS_TOKEN.to_string()),
        &ControlsHandshake {
            token: token.clone(),
        },
    );
    let handshake = match handshake {
        Ok(event) => event,
        Err(err) => {
            state.controls_seat().release(&token).await;
            return Err(err.into());
        }
    };

    let snapshot = [
        Some(handshake),
        sse_events::game_state_event(state),
        sse_events::controls_view_event(state),
        system_status_event(state),
    ]
    .into_iter()
    .flatten()
    .collect();
    Ok(ControlsSubscription {
        receiver,
        snapshot,
        token,
    })
}

fn system_status_event(state: &SharedState) -> Option<ServerEvent> {
    ServerEvent::json(
        Some("system_status".to_string()),
        &SystemStatus {
            degraded: state.is_degraded(),
        },
    )
    .ok()
}

/// Identifies the target SSE stream so we can perform stream-specific
/// bookkeeping when the connection is torn down.
#[derive(Clone)]
pub enum StreamKind {
    /// Public board display.
    Board,
    /// Operator stream; the seat is released on teardown.
    Controls { state: SharedState, token: String },
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Convert a broadcast receiver into an SSE response, replaying `snapshot` first and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    snapshot: Vec<ServerEvent>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let mut open = true;
        for payload in snapshot {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                open = false;
                break;
            }
        }

        while open {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Later snapshots supersede the skipped ones.
                            warn!(skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        match kind {
            StreamKind::Board => info!("board SSE stream disconnected"),
            StreamKind::Controls { state, token } => {
                state.controls_seat().release(&token).await;
                info!("controls SSE stream disconnected")
            }
        }
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Check a token presented by a controls request.
pub async fn verify_controls_token(
    state: &SharedState,
    provided: &str,
) -> Result<(), ServiceError> {
    state
        .controls_seat()
        .verify(provided)
        .await
        .map_err(|err| ServiceError::Unauthorized(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::AppState};

    #[tokio::test]
    async fn only_one_controls_stream_at_a_time() {
        let state = AppState::new(AppConfig::default());

        let subscription = subscribe_controls(&state).await.unwrap();
        assert_eq!(
            subscription.snapshot[0].event.as_deref(),
            Some(EVENT_CONTROLS_TOKEN)
        );
        let handshake: serde_json::Value =
            serde_json::from_str(&subscription.snapshot[0].data).unwrap();
        let token = subscription.token.clone();
        assert_eq!(handshake["token"], token.as_str());

        assert!(matches!(
            subscribe_controls(&state).await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(verify_controls_token(&state, &token).await.is_ok());
        assert!(verify_controls_token(&state, "nope").await.is_err());

        state.controls_seat().release(&token).await;
        assert!(verify_controls_token(&state, &token).await.is_err());
        assert!(subscribe_controls(&state).await.is_ok());
    }

    #[tokio::test]
    async fn board_snapshot_is_neutral_before_sync() {
        let state = AppState::new(AppConfig::default());
        let (_receiver, snapshot) = subscribe_board(&state);
        let names: Vec<_> = snapshot.iter().filter_map(|e| e.event.as_deref()).collect();
        assert_eq!(names, vec!["game_state", "question", "system_status"]);
        let game: serde_json::Value = serde_json::from_str(&snapshot[0].data).unwrap();
        assert!(game["phase"].is_null());
        assert_eq!(game["degraded"], true);
    }
}
