//! Conversation turns consumed by the summarizer and stored in transcripts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single turn in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: Uuid,

    /// User this conversation belongs to
    pub user_id: String,

    /// Conversation/thread this message belongs to
    pub conversation_id: String,

    /// Role of the sender
    pub role: Role,

    /// Message content
    pub content: String,

    /// Timestamp when the message was created
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message stamped with the current time
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Override the timestamp (imports, replays, tests)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Total content size of a set of turns, in characters
pub fn total_chars(turns: &[Message]) -> usize {
    turns.iter().map(|m| m.content.chars().count()).sum()
}

/// Render turns as `role: content` lines
pub fn transcript(turns: &[Message]) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }
    out
}
