//! Protocol messages for host/player communication.
//!
//! All messages are JSON text frames over WebSocket, tagged by a `type` field.
//! Unknown fields are ignored so older peers keep working.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::models::QuestionKind;

/// Every message exchanged between server and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum WireMessage {
    /// Player asks to join a room. `prior_player_id` requests a takeover.
    #[serde(rename = "join_req")]
    JoinRequest {
        room_code: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(rename = "playerId", default, skip_serializing_if = "Option::is_none")]
        prior_player_id: Option<String>,
    },

    #[serde(rename = "join_ok")]
    JoinAccepted {
        player_id: String,
        players: Vec<PlayerInfo>,
    },

    #[serde(rename = "join_denied")]
    JoinDenied { reason: String },

    /// Current roster in join order.
    #[serde(rename = "players")]
    PlayersUpdate { players: Vec<PlayerInfo> },

    #[serde(rename = "start_game")]
    GameStarted { question_count: usize },

    #[serde(rename = "game_cancelled")]
    GameCancelled { reason: String },

    /// A question is in flight. `remaining_duration_ms == 0` means no timer.
    #[serde(rename = "question")]
    QuestionBroadcast {
        index: usize,
        total: usize,
        text: String,
        kind: QuestionKind,
        #[serde(default)]
        options: Vec<String>,
        #[serde(rename = "durationMs", default)]
        remaining_duration_ms: u64,
    },

    #[serde(rename = "answer")]
    AnswerSubmit {
        question_index: usize,
        #[serde(rename = "answer")]
        payload: AnswerPayload,
    },

    #[serde(rename = "clear_answer")]
    AnswerClear { question_index: usize },

    #[serde(rename = "reveal")]
    RevealBroadcast {
        question_index: usize,
        #[serde(rename = "correct")]
        correct_payload: AnswerPayload,
        scoreboard: Vec<ScoreEntry>,
    },

    #[serde(rename = "game_over")]
    GameOverBroadcast { scoreboard: Vec<ScoreEntry> },

    #[serde(rename = "error")]
    ProtocolError { message: String },
}

/// An answer as submitted by a player, or the correct answer in a reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnswerPayload {
    Bool { value: bool },
    Index { value: usize },
}

/// Roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
}

/// Scoreboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub player_id: String,
    pub name: String,
    pub correct: u32,
    pub wrong: u32,
}

/// Outcome of a question: the correct answer and the standings after scoring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reveal {
    pub question_index: usize,
    pub correct: AnswerPayload,
    pub scoreboard: Vec<ScoreEntry>,
}

impl Reveal {
    pub fn to_message(&self) -> WireMessage {
        WireMessage::RevealBroadcast {
            question_index: self.question_index,
            correct_payload: self.correct,
            scoreboard: self.scoreboard.clone(),
        }
    }
}

/// Player names longer than this are truncated.
pub const NAME_MAX_LENGTH: usize = 24;

/// Path the server accepts WebSocket upgrades on.
pub const WS_PATH: &str = "/ws";

/// Room codes avoid glyphs that are easy to confuse (0/O, 1/I).
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ROOM_CODE_LENGTH: usize = 4;

/// Serialize a message into its text frame payload.
pub fn encode(msg: &WireMessage) -> String {
    // Every variant is plain data with string keys, so serialization cannot fail.
    serde_json::to_string(msg).unwrap_or_default()
}

/// Parse a text frame payload.
pub fn decode(text: &str) -> Result<WireMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Normalizes a player name: trims it and caps it at [`NAME_MAX_LENGTH`] characters.
///
/// Returns `Err` with a reason when nothing is left.
pub fn normalize_name(name: &str) -> Result<String, &'static str> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err("Name must not be empty");
    }

    Ok(trimmed.chars().take(NAME_MAX_LENGTH).collect())
}

/// Generate a fresh room code.
pub fn random_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Alice ").unwrap(), "Alice");
        assert!(normalize_name("   ").is_err());
        let long = "x".repeat(40);
        assert_eq!(normalize_name(&long).unwrap().chars().count(), NAME_MAX_LENGTH);
        // multi-byte names are cut on characters, not bytes
        let cyrillic = "Ж".repeat(30);
        assert_eq!(normalize_name(&cyrillic).unwrap(), "Ж".repeat(NAME_MAX_LENGTH));
    }

    #[test]
    fn test_message_serialization() {
        let msg = WireMessage::JoinRequest {
            room_code: "ABCD".to_string(),
            name: "Alice".to_string(),
            password: None,
            prior_player_id: Some("p-1".to_string()),
        };
        let json = encode(&msg);
        assert!(json.contains("\"type\":\"join_req\""));
        assert!(json.contains("\"roomCode\":\"ABCD\""));
        assert!(json.contains("\"playerId\":\"p-1\""));
        assert!(!json.contains("password"));

        let msg = WireMessage::AnswerSubmit {
            question_index: 2,
            payload: AnswerPayload::Bool { value: true },
        };
        let json = encode(&msg);
        assert!(json.contains("\"questionIndex\":2"));
        assert!(json.contains("\"answer\":{\"type\":\"bool\",\"value\":true}"));
    }

    #[test]
    fn test_decode_question_with_wire_names() {
        let text = r#"{"type":"question","index":0,"total":2,"text":"Q1","kind":"YESNO","durationMs":15000}"#;
        let msg = decode(text).unwrap();
        assert_eq!(
            msg,
            WireMessage::QuestionBroadcast {
                index: 0,
                total: 2,
                text: "Q1".to_string(),
                kind: QuestionKind::YesNo,
                options: Vec::new(),
                remaining_duration_ms: 15_000,
            }
        );
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let text = r#"{"type":"clear_answer","questionIndex":3,"sentAt":12345}"#;
        assert_eq!(decode(text).unwrap(), WireMessage::AnswerClear { question_index: 3 });
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"type":"launch_rockets"}"#).is_err());
        assert!(decode(r#"{"type":"answer","questionIndex":0,"answer":{"type":"index","value":-1}}"#).is_err());
    }

    #[test]
    fn test_random_room_code() {
        let code = random_room_code();
        assert_eq!(code.len(), ROOM_CODE_LENGTH);
        assert!(code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
    }
}
