//! Wire protocol shared by the quiz server and its players.

mod messages;

pub use messages::{
    decode, encode, normalize_name, random_room_code, AnswerPayload, PlayerInfo, Reveal, ScoreEntry,
    WireMessage, NAME_MAX_LENGTH, ROOM_CODE_ALPHABET, ROOM_CODE_LENGTH, WS_PATH,
};
