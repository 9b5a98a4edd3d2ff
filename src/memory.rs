//! Memory item types shared by every component

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Semantic type of a memory item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A raw conversation turn
    Conversation,

    /// A fact about the user or the world
    Fact,

    /// A compressed summary of earlier conversation
    Summary,

    /// An emotionally significant moment
    Emotional,

    /// A topic marker
    Topic,

    /// Long-lived profile information
    Profile,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryType::Conversation => write!(f, "conversation"),
            MemoryType::Fact => write!(f, "fact"),
            MemoryType::Summary => write!(f, "summary"),
            MemoryType::Emotional => write!(f, "emotional"),
            MemoryType::Topic => write!(f, "topic"),
            MemoryType::Profile => write!(f, "profile"),
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(MemoryType::Conversation),
            "fact" => Ok(MemoryType::Fact),
            "summary" => Ok(MemoryType::Summary),
            "emotional" => Ok(MemoryType::Emotional),
            "topic" => Ok(MemoryType::Topic),
            "profile" => Ok(MemoryType::Profile),
            other => Err(Error::invalid_input(format!("unknown memory type: {other}"))),
        }
    }
}

/// The six prioritization signals, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub semantic: f32,
    pub temporal: f32,
    pub frequency: f32,
    pub interaction: f32,
    pub emotional: f32,
    pub topic: f32,
}

impl ComponentScores {
    pub fn as_array(&self) -> [f32; 6] {
        [
            self.semantic,
            self.temporal,
            self.frequency,
            self.interaction,
            self.emotional,
            self.topic,
        ]
    }
}

/// A candidate piece of context considered for the next prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,

    /// Signals from the most recent prioritization pass
    #[serde(default)]
    pub scores: ComponentScores,

    /// Weighted composite, clamped to [0, 1]
    #[serde(default)]
    pub final_score: f32,

    /// Share of strong signals, clamped to [0, 1]
    #[serde(default)]
    pub confidence: f32,

    #[serde(default)]
    pub access_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Embedding vector, when the caller has one
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl ContextItem {
    /// Create a new item stamped with the current time
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        memory_type: MemoryType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            memory_type,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            scores: ComponentScores::default(),
            final_score: 0.0,
            confidence: 0.0,
            access_count: 0,
            last_accessed: None,
            keywords: Vec::new(),
            embedding: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Mark the item as selected into a prompt
    pub fn mark_used(&mut self, at: DateTime<Utc>) {
        self.last_accessed = Some(at);
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Keywords to match against, extracting them when the caller supplied none
    pub fn effective_keywords(&self) -> Vec<String> {
        if self.keywords.is_empty() {
            crate::text::extract_keywords(&self.content, 10)
        } else {
            self.keywords.iter().map(|k| k.to_lowercase()).collect()
        }
    }
}
