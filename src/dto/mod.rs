//! Request and response payloads of the HTTP and SSE surfaces.

pub mod board;
pub mod common;
pub mod controls;
pub mod health;
pub mod sse;
