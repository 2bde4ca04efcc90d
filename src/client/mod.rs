//! Quiz player client.
//!
//! Joins a room over WebSocket and keeps the seat across connection drops.

mod client;
mod state;

pub use client::{resolve_room, QuizClient};
pub use state::{ClientEvent, ClientSession, QuestionView};
