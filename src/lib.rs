//! # Dieah Recall
//!
//! Memory optimization and retrieval for conversational agents.
//!
//! ## Components
//!
//! - **Deduplicator** - fingerprints new content and refuses exact and near duplicates
//! - **Topic Clusterer** - assigns memories to topics and periodically rebuilds them
//! - **Context Prioritizer** - ranks candidate memories for a query under a diversity filter
//! - **Conversation Summarizer** - compresses long or stale conversations into summaries
//!
//! Embedding, generation and fact extraction are pluggable collaborators. Each
//! component keeps working without them, falling back to lexical heuristics.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dieah_recall::{Config, MemoryEngine, MemoryType};
//!
//! let engine = MemoryEngine::builder(Config::default())
//!     .embedder(Arc::new(FastEmbedProvider::new(&config)?))
//!     .build()?;
//!
//! // Offer content to memory
//! let outcome = engine.ingest("alice", "I just adopted a greyhound", MemoryType::Fact).await;
//!
//! // Build a context for a query
//! let context = engine.retrieve("alice", "tell me about my dog", recent, 10).await;
//! println!("{}", context.format_for_prompt());
//! ```

pub mod cache;
pub mod clustering;
pub mod config;
pub mod dedup;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod memory;
pub mod message;
pub mod retrieval;
pub mod similarity;
pub mod storage;
pub mod summarizer;
pub mod text;

#[cfg(test)]
mod testing;

pub use clustering::{TopicAssignment, TopicCluster, TopicClusterer};
pub use config::Config;
pub use dedup::{AdmissionDecision, AdmissionReason, Deduplicator};
pub use embedding::EmbeddingProvider;
pub use engine::{IngestOutcome, MemoryEngine};
pub use error::{Error, Result};
pub use generation::{FactExtractor, GenerativeTextProvider};
pub use memory::{ContextItem, MemoryType};
pub use message::{Message, Role};
pub use retrieval::{ContextPrioritizer, RetrievalContext};
pub use summarizer::{ConversationSummarizer, ConversationSummary};
