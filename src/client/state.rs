//! Client-side view of a session.

use std::time::Duration;

use crate::models::QuestionKind;
use crate::protocol::{AnswerPayload, PlayerInfo, Reveal, ScoreEntry, WireMessage};

/// The question currently shown to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub index: usize,
    pub total: usize,
    pub text: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    /// Time left when the question reached us. `None` when untimed.
    pub duration: Option<Duration>,
}

/// Events delivered to the caller of a [`QuizClient`](super::QuizClient).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Joined { my_id: String, players: Vec<PlayerInfo> },
    RosterChanged { players: Vec<PlayerInfo> },
    GameStarted { count: usize },
    GameCancelled { reason: String },
    Question(QuestionView),
    Revealed(Reveal),
    GameOver { scoreboard: Vec<ScoreEntry> },
    /// Connection lost after a successful join; retrying in the background.
    Reconnecting,
    Error { message: String },
}

/// What the client knows about its session, built from server messages.
#[derive(Debug, Default)]
pub struct ClientSession {
    player_id: Option<String>,
    question: Option<QuestionView>,
    my_answer: Option<AnswerPayload>,
    last_reveal: Option<Reveal>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id issued by the server, kept across reconnects.
    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn question(&self) -> Option<&QuestionView> {
        self.question.as_ref()
    }

    pub fn my_answer(&self) -> Option<&AnswerPayload> {
        self.my_answer.as_ref()
    }

    pub fn last_reveal(&self) -> Option<&Reveal> {
        self.last_reveal.as_ref()
    }

    /// Fold a server message into the session. Returns the event to surface,
    /// if any.
    pub fn apply(&mut self, msg: WireMessage) -> Option<ClientEvent> {
        match msg {
            WireMessage::JoinAccepted { player_id, players } => {
                self.player_id = Some(player_id.clone());
                Some(ClientEvent::Joined {
                    my_id: player_id,
                    players,
                })
            }
            WireMessage::JoinDenied { reason } => Some(ClientEvent::Error { message: reason }),
            WireMessage::PlayersUpdate { players } => Some(ClientEvent::RosterChanged { players }),
            WireMessage::GameStarted { question_count } => {
                // after a reconnect the server resends the start of the game in progress
                if self.question.as_ref().is_none_or(|q| q.total != question_count) {
                    self.reset_round();
                }
                Some(ClientEvent::GameStarted { count: question_count })
            }
            WireMessage::GameCancelled { reason } => {
                self.reset_round();
                Some(ClientEvent::GameCancelled { reason })
            }
            WireMessage::QuestionBroadcast {
                index,
                total,
                text,
                kind,
                options,
                remaining_duration_ms,
            } => {
                // a catch-up resend of the same question keeps our answer
                if self.question.as_ref().is_none_or(|q| q.index != index) {
                    self.my_answer = None;
                    self.last_reveal = None;
                }
                let view = QuestionView {
                    index,
                    total,
                    text,
                    kind,
                    options,
                    duration: (remaining_duration_ms > 0).then(|| Duration::from_millis(remaining_duration_ms)),
                };
                self.question = Some(view.clone());
                Some(ClientEvent::Question(view))
            }
            WireMessage::RevealBroadcast {
                question_index,
                correct_payload,
                scoreboard,
            } => {
                let reveal = Reveal {
                    question_index,
                    correct: correct_payload,
                    scoreboard,
                };
                self.last_reveal = Some(reveal.clone());
                Some(ClientEvent::Revealed(reveal))
            }
            WireMessage::GameOverBroadcast { scoreboard } => {
                self.question = None;
                self.my_answer = None;
                Some(ClientEvent::GameOver { scoreboard })
            }
            WireMessage::ProtocolError { message } => Some(ClientEvent::Error { message }),
            other => {
                tracing::debug!("Ignoring unexpected message from server: {:?}", other);
                None
            }
        }
    }

    /// Remember our answer for the current question.
    pub fn record_answer(&mut self, question_index: usize, payload: AnswerPayload) -> bool {
        if self.question.as_ref().is_none_or(|q| q.index != question_index) || self.last_reveal.is_some() {
            return false;
        }
        self.my_answer = Some(payload);
        true
    }

    pub fn clear_answer(&mut self, question_index: usize) -> bool {
        if self.question.as_ref().is_none_or(|q| q.index != question_index) {
            return false;
        }
        self.my_answer.take().is_some()
    }

    fn reset_round(&mut self) {
        self.question = None;
        self.my_answer = None;
        self.last_reveal = None;
    }
}
