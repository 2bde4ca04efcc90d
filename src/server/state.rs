//! Session state.
//!
//! Everything the coordinator mutates lives in one [`SessionState`] behind a
//! single lock: the connection registry, scores, answers and the game phase.
//! Every operation here runs to completion without awaiting. Messages are
//! queued on connection handles in the order state changes, and host events
//! are collected for the coordinator to emit once the lock is released.

use std::time::Instant;

use crate::models::Question;
use crate::protocol::{normalize_name, AnswerPayload, PlayerInfo, WireMessage};

use super::events::HostEvent;
use super::game::{Game, GamePhase, GameSettings};
use super::registry::{CloseReason, ConnectionHandle, ConnectionId, ConnectionRegistry, Unbound};

/// A join request as received from a connection.
#[derive(Debug, Clone, Copy)]
pub struct JoinAttempt<'a> {
    pub room_code: &'a str,
    pub name: &'a str,
    pub password: Option<&'a str>,
    pub prior_player_id: Option<&'a str>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Accepted { player_id: String },
    /// The connection was refused and asked to close.
    Denied { reason: String },
    /// Unknown connection or repeated join; nothing changed.
    Ignored,
}

/// What an advance of the game did.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Revealed,
    Question(usize),
    Finished,
    Ignored,
}

pub struct SessionState {
    room_code: String,
    /// `None` when the room has no password.
    password: Option<String>,
    questions: Vec<Question>,
    registry: ConnectionRegistry,
    game: Game,
    /// Connections found dead during a broadcast, waiting to be unbound.
    dead: Vec<ConnectionId>,
    outbox: Vec<HostEvent>,
    /// Players who lost their connection mid-game and are kept for a reconnect.
    retained: Vec<String>,
    closed: bool,
}

impl SessionState {
    pub fn new(room_code: impl Into<String>, password: Option<String>, questions: Vec<Question>) -> Self {
        Self {
            room_code: room_code.into(),
            password: password.filter(|p| !p.trim().is_empty()),
            questions,
            registry: ConnectionRegistry::new(),
            game: Game::new(),
            dead: Vec::new(),
            outbox: Vec::new(),
            retained: Vec::new(),
            closed: false,
        }
    }

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn players(&self) -> Vec<PlayerInfo> {
        self.registry.snapshot_players()
    }

    /// Take the host events and retained player ids produced so far.
    pub fn drain_effects(&mut self) -> (Vec<HostEvent>, Vec<String>) {
        (std::mem::take(&mut self.outbox), std::mem::take(&mut self.retained))
    }

    pub fn register(&mut self, id: ConnectionId, handle: ConnectionHandle) {
        if self.closed {
            handle.close(CloseReason::Normal("Room is closed".to_string()));
            return;
        }
        self.registry.register(id, handle);
    }

    /// Validate and bind a join request, then catch the player up.
    pub fn join(&mut self, id: ConnectionId, attempt: JoinAttempt<'_>, now: Instant) -> JoinOutcome {
        let Some(handle) = self.registry.handle(id).cloned() else {
            return JoinOutcome::Ignored;
        };
        if self.registry.player_of(id).is_some() {
            handle.send(WireMessage::ProtocolError {
                message: "Already joined".to_string(),
            });
            return JoinOutcome::Ignored;
        }

        let name = match self.authorize(&attempt) {
            Ok(name) => name,
            Err(reason) => {
                tracing::info!("Join denied on {}: {}", id, reason);
                handle.send(WireMessage::JoinDenied { reason: reason.clone() });
                handle.close(CloseReason::CannotAccept(reason.clone()));
                return JoinOutcome::Denied { reason };
            }
        };

        let Some(binding) = self.registry.bind_player(id, attempt.prior_player_id, &name) else {
            return JoinOutcome::Ignored;
        };
        if let Some(evicted) = binding.evicted {
            tracing::info!("Player {} took over from an older connection", binding.player_id);
            evicted.close(CloseReason::Normal("Replaced by a newer connection".to_string()));
        }
        if binding.reconnected {
            tracing::info!("{} reconnected as {}", name, binding.player_id);
        } else {
            tracing::info!("{} joined as {}", name, binding.player_id);
        }
        self.game.ensure_score(&binding.player_id);

        let players = self.registry.snapshot_players();
        handle.send(WireMessage::JoinAccepted {
            player_id: binding.player_id.clone(),
            players: players.clone(),
        });
        self.broadcast(WireMessage::PlayersUpdate {
            players: players.clone(),
        });
        self.catch_up(&handle, now);

        self.outbox.push(HostEvent::PlayerJoined {
            id: binding.player_id.clone(),
            name,
        });
        self.outbox.push(HostEvent::RosterChanged { players });
        self.settle();

        JoinOutcome::Accepted {
            player_id: binding.player_id,
        }
    }

    /// Room code is case-insensitive, password exact. Returns the normalized name.
    fn authorize(&self, attempt: &JoinAttempt<'_>) -> Result<String, String> {
        if attempt.room_code.to_lowercase() != self.room_code.to_lowercase() {
            return Err("Wrong room code".to_string());
        }
        if let Some(password) = &self.password {
            if attempt.password.unwrap_or_default() != password {
                return Err("Wrong password".to_string());
            }
        }
        normalize_name(attempt.name).map_err(String::from)
    }

    /// Bring a freshly joined connection to the current phase.
    fn catch_up(&self, handle: &ConnectionHandle, now: Instant) {
        match self.game.phase() {
            GamePhase::Idle => {}
            GamePhase::Finished => {
                let scoreboard = self.game.final_scoreboard();
                if !scoreboard.is_empty() {
                    handle.send(WireMessage::GameOverBroadcast {
                        scoreboard: scoreboard.to_vec(),
                    });
                }
            }
            GamePhase::Running(round) => {
                handle.send(WireMessage::GameStarted {
                    question_count: self.questions.len(),
                });
                let elapsed = now.saturating_duration_since(round.started_at);
                if let Some(msg) = self.question_message(round.index, round.settings.remaining_ms(elapsed)) {
                    handle.send(msg);
                }
                if let Some(reveal) = round.last_reveal.as_ref().filter(|_| round.revealed) {
                    handle.send(reveal.to_message());
                }
            }
        }
    }

    pub fn submit_answer(&mut self, id: ConnectionId, question_index: usize, payload: AnswerPayload) -> bool {
        let Some(player_id) = self.registry.player_of(id) else {
            return false;
        };
        let player_id = player_id.to_string();
        self.game.record_answer(&player_id, question_index, payload)
    }

    pub fn clear_answer(&mut self, id: ConnectionId, question_index: usize) -> bool {
        let Some(player_id) = self.registry.player_of(id) else {
            return false;
        };
        let player_id = player_id.to_string();
        self.game.clear_answer(&player_id, question_index)
    }

    /// Connection teardown, whatever the cause.
    pub fn disconnect(&mut self, id: ConnectionId) {
        self.unbind(id);
        self.settle();
    }

    fn unbind(&mut self, id: ConnectionId) {
        let Unbound::Left { player_id, removed } = self.registry.unbind(id, self.game.is_running()) else {
            return;
        };

        if removed {
            tracing::info!("Player {} left", player_id);
            self.game.forget_player(&player_id);
        } else {
            tracing::info!("Player {} disconnected mid-game, keeping their seat", player_id);
            self.retained.push(player_id.clone());
        }

        self.outbox.push(HostEvent::PlayerLeft { id: player_id });
        self.broadcast_roster();
    }

    /// Start a game. Returns the run id, or `None` when refused.
    pub fn start_game(&mut self, settings: GameSettings, now: Instant) -> Option<u64> {
        if self.game.is_running() {
            tracing::debug!("Game already running, ignoring start");
            return None;
        }
        if self.questions.is_empty() {
            self.outbox.push(HostEvent::Error {
                message: "No questions to play".to_string(),
            });
            return None;
        }

        let run_id = self.game.start(settings, self.registry.players(), now)?;
        let count = self.questions.len();
        tracing::info!("Game {} started with {} questions", run_id, count);

        self.broadcast(WireMessage::GameStarted { question_count: count });
        self.outbox.push(HostEvent::GameStarted { count });
        self.announce_question();
        self.settle();

        Some(run_id)
    }

    fn announce_question(&mut self) {
        let Some(round) = self.game.round() else {
            return;
        };
        let index = round.index;
        let Some(msg) = self.question_message(index, round.settings.remaining_ms(std::time::Duration::ZERO)) else {
            return;
        };

        tracing::info!("Question {}/{}", index + 1, self.questions.len());
        self.broadcast(msg);
        self.outbox.push(HostEvent::QuestionStarted {
            index,
            total: self.questions.len(),
            question: self.questions[index].clone(),
        });
    }

    fn question_message(&self, index: usize, remaining_duration_ms: u64) -> Option<WireMessage> {
        let question = self.questions.get(index)?;
        Some(WireMessage::QuestionBroadcast {
            index,
            total: self.questions.len(),
            text: question.text.clone(),
            kind: question.kind(),
            options: question.options.clone(),
            remaining_duration_ms,
        })
    }

    /// Reveal question `index` of game `run_id`. Idempotent.
    pub fn reveal(&mut self, run_id: u64, index: usize) -> bool {
        let Some(question) = self.questions.get(index) else {
            return false;
        };
        let Some(reveal) = self.game.reveal(run_id, index, question, self.registry.players()) else {
            return false;
        };

        tracing::info!("Revealed question {}", index + 1);
        self.broadcast(reveal.to_message());
        self.outbox.push(HostEvent::Revealed(reveal));
        self.settle();
        true
    }

    /// After a reveal: next question, or the end of the game.
    pub fn next_question(&mut self, run_id: u64, now: Instant) -> Step {
        let Some(round) = self.game.round().filter(|r| r.run_id == run_id && r.revealed) else {
            return Step::Ignored;
        };

        let next = round.index + 1;
        if next >= self.questions.len() {
            return if self.finish(run_id) { Step::Finished } else { Step::Ignored };
        }

        self.game.begin_question(run_id, next, now);
        self.announce_question();
        self.settle();
        Step::Question(next)
    }

    /// Host trigger in manual mode: reveal the open question, or move on.
    pub fn advance(&mut self, now: Instant) -> Step {
        let Some(round) = self.game.round() else {
            return Step::Ignored;
        };
        if !round.settings.is_manual() {
            tracing::debug!("Advance ignored, game runs on its timer");
            return Step::Ignored;
        }

        let (run_id, index) = (round.run_id, round.index);
        if round.revealed {
            self.next_question(run_id, now)
        } else if self.reveal(run_id, index) {
            Step::Revealed
        } else {
            Step::Ignored
        }
    }

    /// Broadcast the final standings and drop players who never came back.
    pub fn finish(&mut self, run_id: u64) -> bool {
        let Some(scoreboard) = self.game.finish(run_id, self.registry.players()) else {
            return false;
        };

        tracing::info!("Game {} over", run_id);
        self.broadcast(WireMessage::GameOverBroadcast {
            scoreboard: scoreboard.clone(),
        });
        self.outbox.push(HostEvent::GameOver { scoreboard });
        self.prune_disconnected();
        self.settle();
        true
    }

    /// Abort the running game. Returns `false` if none was running.
    pub fn cancel(&mut self, reason: &str) -> bool {
        if !self.game.cancel() {
            return false;
        }

        tracing::info!("Game cancelled: {}", reason);
        self.broadcast(WireMessage::GameCancelled {
            reason: reason.to_string(),
        });
        self.outbox.push(HostEvent::GameCancelled {
            reason: reason.to_string(),
        });
        self.prune_disconnected();
        self.settle();
        true
    }

    /// Reconnect window of a retained player ran out.
    pub fn expire_player(&mut self, player_id: &str) -> bool {
        if self.registry.is_connected(player_id) || !self.registry.remove_player(player_id) {
            return false;
        }

        tracing::info!("Player {} did not come back, removing from roster", player_id);
        self.broadcast_roster();
        self.settle();
        true
    }

    /// Close every connection and refuse new ones.
    pub fn close_all(&mut self, reason: &str) {
        self.closed = true;
        for handle in self.registry.drain() {
            handle.close(CloseReason::Normal(reason.to_string()));
        }
    }

    fn prune_disconnected(&mut self) {
        let pruned = self.registry.prune_disconnected();
        self.game.retain_players(self.registry.players());
        if !pruned.is_empty() {
            tracing::info!("Pruned {} disconnected players", pruned.len());
            self.broadcast_roster();
        }
    }

    fn broadcast_roster(&mut self) {
        let players = self.registry.snapshot_players();
        self.broadcast(WireMessage::PlayersUpdate {
            players: players.clone(),
        });
        self.outbox.push(HostEvent::RosterChanged { players });
    }

    fn broadcast(&mut self, msg: WireMessage) {
        let dead = self.registry.broadcast(&msg);
        self.dead.extend(dead);
    }

    /// Unbind connections that failed a send, like any other disconnect.
    fn settle(&mut self) {
        while let Some(id) = self.dead.pop() {
            self.unbind(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::server::game::Score;
    use crate::server::registry::Outbound;

    struct TestConn {
        id: ConnectionId,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl TestConn {
        fn messages(&mut self) -> Vec<WireMessage> {
            let mut out = Vec::new();
            while let Ok(outbound) = self.rx.try_recv() {
                if let Outbound::Message(msg) = outbound {
                    out.push(msg);
                }
            }
            out
        }

        fn closed(&mut self) -> Option<CloseReason> {
            while let Ok(outbound) = self.rx.try_recv() {
                if let Outbound::Close(reason) = outbound {
                    return Some(reason);
                }
            }
            None
        }
    }

    fn questions() -> Vec<Question> {
        vec![
            Question::yes_no("Q1", true),
            Question::multi("Q2", vec!["A".to_string(), "B".to_string()], 1).unwrap(),
        ]
    }

    fn connect(state: &mut SessionState) -> TestConn {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        state.register(id, ConnectionHandle::new(tx));
        TestConn { id, rx }
    }

    fn attempt<'a>(room_code: &'a str, name: &'a str) -> JoinAttempt<'a> {
        JoinAttempt {
            room_code,
            name,
            password: None,
            prior_player_id: None,
        }
    }

    fn join(state: &mut SessionState, name: &str) -> (TestConn, String) {
        let mut conn = connect(state);
        let JoinOutcome::Accepted { player_id } = state.join(conn.id, attempt("abcd", name), Instant::now()) else {
            panic!("join refused");
        };
        conn.messages();
        (conn, player_id)
    }

    fn manual() -> GameSettings {
        GameSettings {
            manual_advance: true,
            ..GameSettings::default()
        }
    }

    #[test]
    fn test_wrong_room_code_is_denied_regardless_of_password() {
        let mut state = SessionState::new("ABCD", Some("secret".to_string()), questions());
        let mut conn = connect(&mut state);

        let outcome = state.join(
            conn.id,
            JoinAttempt {
                room_code: "WRONG",
                name: "Eve",
                password: Some("secret"),
                prior_player_id: None,
            },
            Instant::now(),
        );

        assert!(matches!(outcome, JoinOutcome::Denied { .. }));
        assert!(matches!(conn.rx.try_recv(), Ok(Outbound::Message(WireMessage::JoinDenied { .. }))));
        assert!(matches!(conn.closed(), Some(CloseReason::CannotAccept(_))));
        assert!(state.players().is_empty());
    }

    #[test]
    fn test_password_is_exact_and_blank_means_none() {
        let mut state = SessionState::new("ABCD", Some("Secret".to_string()), questions());
        let conn = connect(&mut state);
        let denied = state.join(
            conn.id,
            JoinAttempt {
                password: Some("secret"),
                ..attempt("abcd", "Eve")
            },
            Instant::now(),
        );
        assert!(matches!(denied, JoinOutcome::Denied { .. }));

        let mut open = SessionState::new("ABCD", Some("  ".to_string()), questions());
        let conn = connect(&mut open);
        let accepted = open.join(conn.id, attempt("aBcD", "Ann"), Instant::now());
        assert!(matches!(accepted, JoinOutcome::Accepted { .. }));
    }

    #[test]
    fn test_join_sends_accept_then_roster() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (mut ann, ann_id) = join(&mut state, "Ann");
        let mut ben = connect(&mut state);

        state.join(ben.id, attempt("ABCD", "  Ben  "), Instant::now());

        let ben_msgs = ben.messages();
        let WireMessage::JoinAccepted { players, .. } = &ben_msgs[0] else {
            panic!("expected JoinAccepted, got {:?}", ben_msgs[0]);
        };
        assert_eq!(players[0].id, ann_id);
        assert_eq!(players[1].name, "Ben");
        assert!(matches!(ben_msgs[1], WireMessage::PlayersUpdate { .. }));
        assert!(matches!(ann.messages()[..], [WireMessage::PlayersUpdate { .. }]));

        let (events, _) = state.drain_effects();
        assert!(events.iter().any(|e| matches!(e, HostEvent::PlayerJoined { name, .. } if name == "Ben")));
    }

    #[test]
    fn test_end_to_end_scoring() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (mut ann, _) = join(&mut state, "ann");
        let (bob, _) = join(&mut state, "Bob");

        let run = state.start_game(manual(), Instant::now()).unwrap();
        assert!(state.submit_answer(ann.id, 0, AnswerPayload::Bool { value: true }));
        assert!(state.submit_answer(bob.id, 0, AnswerPayload::Bool { value: true }));
        assert_eq!(state.advance(Instant::now()), Step::Revealed);
        assert_eq!(state.advance(Instant::now()), Step::Question(1));

        state.submit_answer(ann.id, 1, AnswerPayload::Index { value: 0 });
        state.submit_answer(bob.id, 1, AnswerPayload::Bool { value: true });
        assert!(state.reveal(run, 1));
        assert_eq!(state.advance(Instant::now()), Step::Finished);

        let WireMessage::GameOverBroadcast { scoreboard } = ann.messages().pop().unwrap() else {
            panic!("expected game over");
        };
        let rows: Vec<_> = scoreboard.iter().map(|s| (s.name.as_str(), s.correct, s.wrong)).collect();
        assert_eq!(rows, vec![("ann", 1, 1), ("Bob", 1, 1)]);
    }

    #[test]
    fn test_reveal_twice_does_not_double_count() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (ann, ann_id) = join(&mut state, "Ann");
        let run = state.start_game(manual(), Instant::now()).unwrap();
        state.submit_answer(ann.id, 0, AnswerPayload::Bool { value: true });

        assert!(state.reveal(run, 0));
        assert!(!state.reveal(run, 0));
        assert_eq!(state.game().score(&ann_id), Score { correct: 1, wrong: 0 });
    }

    #[test]
    fn test_clear_answer_makes_it_wrong() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (ann, ann_id) = join(&mut state, "Ann");
        let run = state.start_game(manual(), Instant::now()).unwrap();

        state.submit_answer(ann.id, 0, AnswerPayload::Bool { value: true });
        assert!(state.clear_answer(ann.id, 0));
        state.reveal(run, 0);

        assert_eq!(state.game().score(&ann_id), Score { correct: 0, wrong: 1 });
    }

    #[test]
    fn test_reconnect_mid_game_keeps_score_and_slot() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (ann, ann_id) = join(&mut state, "Ann");
        let (_bob, _) = join(&mut state, "Bob");
        let run = state.start_game(manual(), Instant::now()).unwrap();
        state.submit_answer(ann.id, 0, AnswerPayload::Bool { value: true });
        state.reveal(run, 0);

        state.disconnect(ann.id);
        let (events, retained) = state.drain_effects();
        assert_eq!(retained, vec![ann_id.clone()]);
        assert!(events.contains(&HostEvent::PlayerLeft { id: ann_id.clone() }));
        assert_eq!(state.players().len(), 2);

        let mut again = connect(&mut state);
        let outcome = state.join(
            again.id,
            JoinAttempt {
                prior_player_id: Some(&ann_id),
                ..attempt("ABCD", "Ann")
            },
            Instant::now(),
        );
        assert_eq!(outcome, JoinOutcome::Accepted { player_id: ann_id.clone() });

        let roster = state.players();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, ann_id);
        assert_eq!(state.game().score(&ann_id), Score { correct: 1, wrong: 0 });

        // catch-up: accepted, roster, game started, question, cached reveal
        let msgs = again.messages();
        assert!(matches!(msgs[2], WireMessage::GameStarted { question_count: 2 }));
        assert!(matches!(msgs[3], WireMessage::QuestionBroadcast { index: 0, .. }));
        assert!(matches!(msgs[4], WireMessage::RevealBroadcast { question_index: 0, .. }));
    }

    #[test]
    fn test_takeover_closes_old_connection_without_player_left() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (mut old, ann_id) = join(&mut state, "Ann");
        state.drain_effects();

        let new = connect(&mut state);
        state.join(
            new.id,
            JoinAttempt {
                prior_player_id: Some(&ann_id),
                ..attempt("ABCD", "Ann")
            },
            Instant::now(),
        );
        assert!(matches!(old.closed(), Some(CloseReason::Normal(_))));

        state.drain_effects();
        state.disconnect(old.id);
        let (events, _) = state.drain_effects();
        assert!(events.is_empty());
        assert_eq!(state.players().len(), 1);
    }

    #[test]
    fn test_late_join_gets_remaining_time() {
        let mut state = SessionState::new("ABCD", None, questions());
        let start = Instant::now();
        state.start_game(GameSettings::default(), start).unwrap();

        let mut late = connect(&mut state);
        state.join(late.id, attempt("ABCD", "Late"), start + Duration::from_secs(10));

        let remaining = late
            .messages()
            .into_iter()
            .find_map(|m| match m {
                WireMessage::QuestionBroadcast {
                    remaining_duration_ms, ..
                } => Some(remaining_duration_ms),
                _ => None,
            })
            .unwrap();
        assert_eq!(remaining, 5000);

        let mut later = connect(&mut state);
        state.join(later.id, attempt("ABCD", "Later"), start + Duration::from_secs(60));
        assert!(later.messages().iter().any(|m| matches!(
            m,
            WireMessage::QuestionBroadcast {
                remaining_duration_ms: 0,
                ..
            }
        )));
    }

    #[test]
    fn test_join_after_finish_gets_final_scoreboard() {
        let mut state = SessionState::new("ABCD", None, vec![Question::yes_no("Q", true)]);
        let (_ann, _) = join(&mut state, "Ann");
        let run = state.start_game(manual(), Instant::now()).unwrap();
        state.reveal(run, 0);
        assert_eq!(state.next_question(run, Instant::now()), Step::Finished);

        let mut late = connect(&mut state);
        state.join(late.id, attempt("ABCD", "Late"), Instant::now());
        let msgs = late.messages();
        assert!(matches!(msgs.last(), Some(WireMessage::GameOverBroadcast { scoreboard }) if scoreboard.len() == 1));
    }

    #[test]
    fn test_cancel_mid_question_never_reveals() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (mut ann, ann_id) = join(&mut state, "Ann");
        let (bob, bob_id) = join(&mut state, "Bob");
        let run = state.start_game(GameSettings::default(), Instant::now()).unwrap();
        state.disconnect(bob.id);
        ann.messages();

        assert!(state.cancel("Host cancelled"));
        assert!(!state.reveal(run, 0));

        let msgs = ann.messages();
        assert!(matches!(msgs[0], WireMessage::GameCancelled { .. }));
        assert!(!msgs.iter().any(|m| matches!(m, WireMessage::RevealBroadcast { .. })));

        // bob had no live connection and is dropped
        let ids: Vec<_> = state.players().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![ann_id]);
        assert_eq!(state.game().score(&bob_id), Score::default());
    }

    #[test]
    fn test_finish_prunes_disconnected_players() {
        let mut state = SessionState::new("ABCD", None, vec![Question::yes_no("Q", true)]);
        let (_ann, _) = join(&mut state, "Ann");
        let (bob, _) = join(&mut state, "Bob");
        let run = state.start_game(manual(), Instant::now()).unwrap();
        state.disconnect(bob.id);
        state.reveal(run, 0);
        state.finish(run);

        assert_eq!(state.game().final_scoreboard().len(), 2);
        assert_eq!(state.players().len(), 1);
    }

    #[test]
    fn test_start_without_questions_reports_error() {
        let mut state = SessionState::new("ABCD", None, Vec::new());
        assert!(state.start_game(GameSettings::default(), Instant::now()).is_none());
        let (events, _) = state.drain_effects();
        assert!(matches!(events[..], [HostEvent::Error { .. }]));
    }

    #[test]
    fn test_advance_ignored_in_automatic_mode() {
        let mut state = SessionState::new("ABCD", None, questions());
        state.start_game(GameSettings::default(), Instant::now()).unwrap();
        assert_eq!(state.advance(Instant::now()), Step::Ignored);
    }

    #[test]
    fn test_dead_connection_is_unbound_during_broadcast() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (_ann, _) = join(&mut state, "Ann");
        let (bob, bob_id) = join(&mut state, "Bob");
        drop(bob.rx);
        state.drain_effects();

        state.start_game(manual(), Instant::now()).unwrap();
        let (events, retained) = state.drain_effects();
        assert!(events.contains(&HostEvent::PlayerLeft { id: bob_id.clone() }));
        assert_eq!(retained, vec![bob_id]);
        assert_eq!(state.registry().connection_count(), 1);
    }

    #[test]
    fn test_expire_player_only_when_still_gone() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (ann, ann_id) = join(&mut state, "Ann");
        state.start_game(manual(), Instant::now()).unwrap();
        state.disconnect(ann.id);

        assert!(state.expire_player(&ann_id));
        assert!(state.players().is_empty());
        assert!(!state.expire_player(&ann_id));
    }

    #[test]
    fn test_close_all_refuses_new_connections() {
        let mut state = SessionState::new("ABCD", None, questions());
        let (mut ann, _) = join(&mut state, "Ann");
        state.close_all("Server stopped");
        assert!(matches!(ann.closed(), Some(CloseReason::Normal(_))));

        let mut late = connect(&mut state);
        assert!(late.closed().is_some());
        assert_eq!(state.join(late.id, attempt("ABCD", "Late"), Instant::now()), JoinOutcome::Ignored);
    }
}
