/// Read-only projections for the board and controls views.
pub mod board_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Round and game lifecycle transitions.
pub mod lifecycle_service;
/// Current-question navigation and round rewinds.
pub mod navigation_service;
/// Answer reveals and wrong-answer feedback.
pub mod reveal_service;
/// First-run store seeding.
pub mod seed_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events stream lifecycle.
pub mod sse_service;
/// Storage connection supervisor.
pub mod storage_supervisor;
