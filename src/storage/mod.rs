//! Storage backends for dieah-recall

mod jsonl;
mod sqlite;

pub use jsonl::{read_transcript, JsonlStorage};
pub use sqlite::SqliteStorage;
