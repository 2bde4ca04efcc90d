//! Game phase bookkeeping.
//!
//! Tracks which question is in flight, collects answers for it and scores
//! them at reveal time. Timing lives in the coordinator; everything here is
//! synchronous and runs under the session lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::{Player, Question};
use crate::protocol::{AnswerPayload, Reveal, ScoreEntry};

/// Default time a question stays open.
pub const DEFAULT_QUESTION_DURATION: Duration = Duration::from_secs(15);

/// How a game is driven, chosen at game start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSettings {
    pub duration: Duration,
    pub timer_enabled: bool,
    /// The host moves the game along with explicit advance calls.
    pub manual_advance: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            duration: DEFAULT_QUESTION_DURATION,
            timer_enabled: true,
            manual_advance: false,
        }
    }
}

impl GameSettings {
    /// Questions have a countdown.
    pub fn is_timed(&self) -> bool {
        self.timer_enabled && !self.duration.is_zero()
    }

    /// The host drives the game. Without a timer there is nothing else to.
    pub fn is_manual(&self) -> bool {
        self.manual_advance || !self.is_timed()
    }

    /// Countdown to announce after `elapsed`. Zero means "no timer".
    pub fn remaining_ms(&self, elapsed: Duration) -> u64 {
        if !self.is_timed() {
            return 0;
        }
        let remaining = self.duration.saturating_sub(elapsed).as_millis();
        u64::try_from(remaining).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Score {
    pub correct: u32,
    pub wrong: u32,
}

/// The question currently on screen.
#[derive(Debug, Clone)]
pub struct Round {
    /// Distinguishes games so stale timers from an earlier game do nothing.
    pub run_id: u64,
    pub settings: GameSettings,
    pub index: usize,
    pub started_at: Instant,
    pub revealed: bool,
    /// Kept for players who join after the reveal.
    pub last_reveal: Option<Reveal>,
}

#[derive(Debug, Clone)]
pub enum GamePhase {
    Idle,
    Running(Round),
    Finished,
}

pub struct Game {
    phase: GamePhase,
    scores: HashMap<String, Score>,
    /// Answers for the in-flight question only.
    answers: HashMap<String, AnswerPayload>,
    final_scoreboard: Vec<ScoreEntry>,
    next_run_id: u64,
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

impl Game {
    pub fn new() -> Self {
        Self {
            phase: GamePhase::Idle,
            scores: HashMap::new(),
            answers: HashMap::new(),
            final_scoreboard: Vec::new(),
            next_run_id: 1,
        }
    }

    pub fn phase(&self) -> &GamePhase {
        &self.phase
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, GamePhase::Running(_))
    }

    pub fn round(&self) -> Option<&Round> {
        match &self.phase {
            GamePhase::Running(round) => Some(round),
            _ => None,
        }
    }

    /// Question index answers are accepted for, if any.
    pub fn accepting_answers_for(&self) -> Option<usize> {
        self.round().filter(|r| !r.revealed).map(|r| r.index)
    }

    /// Standings of the last finished game.
    pub fn final_scoreboard(&self) -> &[ScoreEntry] {
        &self.final_scoreboard
    }

    pub fn score(&self, player_id: &str) -> Score {
        self.scores.get(player_id).copied().unwrap_or_default()
    }

    pub fn answer(&self, player_id: &str) -> Option<&AnswerPayload> {
        self.answers.get(player_id)
    }

    pub fn ensure_score(&mut self, player_id: &str) {
        self.scores.entry(player_id.to_string()).or_default();
    }

    /// Forget everything about a player who left for good.
    pub fn forget_player(&mut self, player_id: &str) {
        self.scores.remove(player_id);
        self.answers.remove(player_id);
    }

    /// Drop score entries of players no longer on the roster.
    pub fn retain_players(&mut self, players: &[Player]) {
        self.scores.retain(|id, _| players.iter().any(|p| &p.id == id));
        self.answers.retain(|id, _| players.iter().any(|p| &p.id == id));
    }

    /// Start a game on question 0. Returns the run id, or `None` if a game
    /// is already running.
    pub fn start(&mut self, settings: GameSettings, players: &[Player], now: Instant) -> Option<u64> {
        if self.is_running() {
            return None;
        }

        let run_id = self.next_run_id;
        self.next_run_id += 1;

        self.scores = players.iter().map(|p| (p.id.clone(), Score::default())).collect();
        self.answers.clear();
        self.final_scoreboard.clear();
        self.phase = GamePhase::Running(Round {
            run_id,
            settings,
            index: 0,
            started_at: now,
            revealed: false,
            last_reveal: None,
        });

        Some(run_id)
    }

    /// Put question `index` in flight.
    pub fn begin_question(&mut self, run_id: u64, index: usize, now: Instant) -> bool {
        let GamePhase::Running(round) = &mut self.phase else {
            return false;
        };
        if round.run_id != run_id {
            return false;
        }

        round.index = index;
        round.started_at = now;
        round.revealed = false;
        round.last_reveal = None;
        self.answers.clear();
        true
    }

    /// Record (or replace) a player's answer for the in-flight question.
    pub fn record_answer(&mut self, player_id: &str, question_index: usize, payload: AnswerPayload) -> bool {
        if self.accepting_answers_for() != Some(question_index) {
            return false;
        }
        self.answers.insert(player_id.to_string(), payload);
        true
    }

    pub fn clear_answer(&mut self, player_id: &str, question_index: usize) -> bool {
        if self.accepting_answers_for() != Some(question_index) {
            return false;
        }
        self.answers.remove(player_id).is_some()
    }

    /// Score question `index` for every known player and close it.
    ///
    /// Runs once per question: a second call, a stale run id or an index that
    /// is not in flight returns `None` and changes nothing.
    pub fn reveal(&mut self, run_id: u64, index: usize, question: &Question, players: &[Player]) -> Option<Reveal> {
        let GamePhase::Running(round) = &mut self.phase else {
            return None;
        };
        if round.run_id != run_id || round.index != index || round.revealed {
            return None;
        }
        round.revealed = true;

        for player in players {
            let score = self.scores.entry(player.id.clone()).or_default();
            if question.is_correct(self.answers.get(&player.id)) {
                score.correct += 1;
            } else {
                score.wrong += 1;
            }
        }
        self.answers.clear();

        let reveal = Reveal {
            question_index: index,
            correct: question.correct_payload(),
            scoreboard: build_scoreboard(players, &self.scores),
        };
        if let GamePhase::Running(round) = &mut self.phase {
            round.last_reveal = Some(reveal.clone());
        }

        Some(reveal)
    }

    /// End the game and cache the final standings.
    pub fn finish(&mut self, run_id: u64, players: &[Player]) -> Option<Vec<ScoreEntry>> {
        match &self.phase {
            GamePhase::Running(round) if round.run_id == run_id => {}
            _ => return None,
        }

        let scoreboard = build_scoreboard(players, &self.scores);
        self.final_scoreboard = scoreboard.clone();
        self.answers.clear();
        self.phase = GamePhase::Finished;
        Some(scoreboard)
    }

    /// Abort a running game. Scores go back to zero.
    pub fn cancel(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }

        self.answers.clear();
        self.scores.values_mut().for_each(|s| *s = Score::default());
        self.final_scoreboard.clear();
        self.phase = GamePhase::Idle;
        true
    }
}

fn build_scoreboard(players: &[Player], scores: &HashMap<String, Score>) -> Vec<ScoreEntry> {
    let mut entries: Vec<ScoreEntry> = players
        .iter()
        .map(|p| {
            let score = scores.get(&p.id).copied().unwrap_or_default();
            ScoreEntry {
                player_id: p.id.clone(),
                name: p.name.clone(),
                correct: score.correct,
                wrong: score.wrong,
            }
        })
        .collect();
    rank(&mut entries);
    entries
}

/// Most correct first, then fewest wrong, then name (case-insensitive).
/// Player id settles identical names so the order is total.
pub fn rank(entries: &mut [ScoreEntry]) {
    entries.sort_by(|a, b| {
        b.correct
            .cmp(&a.correct)
            .then(a.wrong.cmp(&b.wrong))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
}
