mod question;

pub use question::{CorrectAnswer, Player, Question, QuestionKind};
