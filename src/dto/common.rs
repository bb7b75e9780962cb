use serde::Serialize;
use utoipa::ToSchema;

use crate::state::game::GamePhase;

/// Shared snapshot of the game lifecycle as seen by both views.
///
/// Every field is optional so a missing game state document renders as a
/// neutral screen rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct GameStateView {
    /// Lifecycle phase, `null` until the game state document is known.
    pub phase: Option<GamePhase>,
    /// Round in play, `null` until the game state document is known.
    pub round: Option<u8>,
    /// True when the backend operates without a usable store.
    pub degraded: bool,
}
