use serde::{Deserialize, Serialize};

use crate::protocol::AnswerPayload;

/// Shape of a question, as shown to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuestionKind {
    /// Yes/no question answered with a boolean.
    YesNo,
    /// Multiple choice question answered with an option index.
    Multi,
}

/// The correct answer of a question. The variant selects the question kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectAnswer {
    YesNo(bool),
    /// 0-based index into the question options.
    Choice(usize),
}

/// A quiz question. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    /// Answer options, only populated for multiple choice questions.
    pub options: Vec<String>,
    pub answer: CorrectAnswer,
}

impl Question {
    pub fn yes_no(text: impl Into<String>, correct: bool) -> Self {
        Self {
            text: text.into(),
            options: Vec::new(),
            answer: CorrectAnswer::YesNo(correct),
        }
    }

    /// Build a multiple choice question.
    ///
    /// Returns `None` if there are fewer than two options or the correct
    /// index is out of range.
    pub fn multi(text: impl Into<String>, options: Vec<String>, correct_index: usize) -> Option<Self> {
        if options.len() < 2 || correct_index >= options.len() {
            return None;
        }

        Some(Self {
            text: text.into(),
            options,
            answer: CorrectAnswer::Choice(correct_index),
        })
    }

    pub fn kind(&self) -> QuestionKind {
        match self.answer {
            CorrectAnswer::YesNo(_) => QuestionKind::YesNo,
            CorrectAnswer::Choice(_) => QuestionKind::Multi,
        }
    }

    /// The payload a player must have submitted to be scored correct.
    pub fn correct_payload(&self) -> AnswerPayload {
        match self.answer {
            CorrectAnswer::YesNo(value) => AnswerPayload::Bool { value },
            CorrectAnswer::Choice(value) => AnswerPayload::Index { value },
        }
    }

    /// Exact type and value match. A payload of the wrong kind is simply wrong.
    pub fn is_correct(&self, payload: Option<&AnswerPayload>) -> bool {
        match (self.answer, payload) {
            (CorrectAnswer::YesNo(expected), Some(AnswerPayload::Bool { value })) => expected == *value,
            (CorrectAnswer::Choice(expected), Some(AnswerPayload::Index { value })) => expected == *value,
            _ => false,
        }
    }
}

/// A player identity, stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_requires_two_options_and_valid_index() {
        assert!(Question::multi("q", vec!["A".into()], 0).is_none());
        assert!(Question::multi("q", vec!["A".into(), "B".into()], 2).is_none());
        let q = Question::multi("q", vec!["A".into(), "B".into()], 1).unwrap();
        assert_eq!(q.kind(), QuestionKind::Multi);
        assert_eq!(q.correct_payload(), AnswerPayload::Index { value: 1 });
    }

    #[test]
    fn test_is_correct_matches_type_and_value() {
        let yes_no = Question::yes_no("Sky is blue?", true);
        assert!(yes_no.is_correct(Some(&AnswerPayload::Bool { value: true })));
        assert!(!yes_no.is_correct(Some(&AnswerPayload::Bool { value: false })));
        // index 1 must not be read as "true"
        assert!(!yes_no.is_correct(Some(&AnswerPayload::Index { value: 1 })));
        assert!(!yes_no.is_correct(None));

        let multi = Question::multi("Pick", vec!["A".into(), "B".into()], 0).unwrap();
        assert!(multi.is_correct(Some(&AnswerPayload::Index { value: 0 })));
        assert!(!multi.is_correct(Some(&AnswerPayload::Bool { value: false })));
    }
}
