mod loader;

pub use loader::{load_questions_from_path, parse_questions};
