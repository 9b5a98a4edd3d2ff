//! JSONL storage for conversation transcripts

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::message::Message;

/// Append-only transcripts, one file per user and conversation
pub struct JsonlStorage {
    base_path: PathBuf,
}

impl JsonlStorage {
    pub fn new(config: &Config) -> Result<Self> {
        let base_path = config.data_dir.join("conversations");
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    fn log_path(&self, user_id: &str, conversation_id: &str) -> PathBuf {
        self.base_path
            .join(user_id)
            .join(format!("{}.jsonl", conversation_id))
    }

    /// Append a message, returning the byte offset it was written at
    pub fn append(&self, message: &Message) -> Result<u64> {
        std::fs::create_dir_all(self.base_path.join(&message.user_id))?;

        let path = self.log_path(&message.user_id, &message.conversation_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let offset = file.seek(SeekFrom::End(0))?;
        let json = serde_json::to_string(message)?;
        writeln!(file, "{}", json)?;

        Ok(offset)
    }

    pub fn read_all(&self, user_id: &str, conversation_id: &str) -> Result<Vec<Message>> {
        read_transcript(self.log_path(user_id, conversation_id))
    }

    pub fn read_last_n(
        &self,
        user_id: &str,
        conversation_id: &str,
        n: usize,
    ) -> Result<Vec<Message>> {
        let mut all = self.read_all(user_id, conversation_id)?;
        let start = all.len().saturating_sub(n);
        Ok(all.split_off(start))
    }

    pub fn count(&self, user_id: &str, conversation_id: &str) -> Result<usize> {
        let path = self.log_path(user_id, conversation_id);
        if !path.exists() {
            return Ok(0);
        }

        let reader = BufReader::new(File::open(&path)?);
        Ok(reader
            .lines()
            .filter(|l| l.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(false))
            .count())
    }

    /// Conversation ids stored for a user, sorted
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<String>> {
        let user_dir = self.base_path.join(user_id);
        if !user_dir.exists() {
            return Ok(Vec::new());
        }

        let mut conversations = Vec::new();
        for entry in std::fs::read_dir(&user_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                if let Some(stem) = path.file_stem() {
                    conversations.push(stem.to_string_lossy().to_string());
                }
            }
        }
        conversations.sort();
        Ok(conversations)
    }

    pub fn list_users(&self) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                users.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        users.sort();
        Ok(users)
    }

    pub fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        let path = self.log_path(user_id, conversation_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Parse a JSONL transcript file; a missing file is an empty transcript
pub fn read_transcript(path: impl AsRef<Path>) -> Result<Vec<Message>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut messages = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        messages.push(serde_json::from_str(&line)?);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn storage() -> (tempfile::TempDir, JsonlStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonlStorage::new(&Config::with_data_dir(dir.path())).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_append_and_read_back() {
        let (_dir, storage) = storage();
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            storage
                .append(&Message::new("alice", "trip", role, format!("message {i}")))
                .unwrap();
        }

        assert_eq!(storage.count("alice", "trip").unwrap(), 5);
        let last = storage.read_last_n("alice", "trip", 2).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].content, "message 4");
        assert_eq!(last[0].role, Role::Assistant);
    }

    #[test]
    fn test_missing_conversation_is_empty() {
        let (_dir, storage) = storage();
        assert!(storage.read_all("bob", "nothing").unwrap().is_empty());
        assert_eq!(storage.count("bob", "nothing").unwrap(), 0);
        assert!(storage.list_conversations("bob").unwrap().is_empty());
    }

    #[test]
    fn test_list_and_delete() {
        let (_dir, storage) = storage();
        storage.append(&Message::new("alice", "b-chat", Role::User, "hi")).unwrap();
        storage.append(&Message::new("alice", "a-chat", Role::User, "hello")).unwrap();
        storage.append(&Message::new("bob", "x", Role::User, "hey")).unwrap();

        assert_eq!(storage.list_conversations("alice").unwrap(), vec!["a-chat", "b-chat"]);
        assert_eq!(storage.list_users().unwrap(), vec!["alice", "bob"]);

        storage.delete_conversation("alice", "a-chat").unwrap();
        assert_eq!(storage.list_conversations("alice").unwrap(), vec!["b-chat"]);
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let (dir, storage) = storage();
        storage.append(&Message::new("alice", "c", Role::User, "fine")).unwrap();
        let path = dir.path().join("conversations").join("alice").join("c.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert!(storage.read_all("alice", "c").is_err());
    }
}
