//! Quiz session coordinator.
//!
//! Hosts a room over WebSocket, tracks who is connected and drives games.

mod commands;
mod events;
mod game;
mod registry;
mod server;
mod state;

pub use commands::{execute_command, parse_command, CommandResult, HostCommand};
pub use events::HostEvent;
pub use game::{rank, Game, GamePhase, GameSettings, Round, Score, DEFAULT_QUESTION_DURATION};
pub use registry::{Binding, CloseReason, ConnectionHandle, ConnectionId, ConnectionRegistry, Outbound, Unbound};
pub use server::QuizServer;
pub use state::{JoinAttempt, JoinOutcome, SessionState, Step};
