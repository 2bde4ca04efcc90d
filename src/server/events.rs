//! Events the coordinator reports to its host application.

use crate::models::Question;
use crate::protocol::{PlayerInfo, Reveal, ScoreEntry};

/// Delivered over an unbounded channel; emitting never blocks the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The room is advertised as `name` and accepts players on `port`.
    RoomStarted { name: String, port: u16 },
    Error { message: String },
    PlayerJoined { id: String, name: String },
    PlayerLeft { id: String },
    RosterChanged { players: Vec<PlayerInfo> },
    GameStarted { count: usize },
    GameCancelled { reason: String },
    QuestionStarted { index: usize, total: usize, question: Question },
    Revealed(Reveal),
    GameOver { scoreboard: Vec<ScoreEntry> },
}
