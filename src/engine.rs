//! The memory engine: one entry point wiring the four components together
//!
//! New content flows through the deduplicator, then the topic clusterer, and
//! is kept as a [`ContextItem`] that later retrieval calls rank. Admitted
//! summaries become memory items of their own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::clustering::{ClusterStats, ReclusterStats, TopicAssignment, TopicClusterer};
use crate::config::Config;
use crate::dedup::{AdmissionDecision, DedupStats, Deduplicator, OptimizationReport};
use crate::embedding::{EmbeddingProvider, TokenCounter};
use crate::error::Result;
use crate::generation::{FactExtractor, GenerativeTextProvider};
use crate::memory::{ContextItem, MemoryType};
use crate::message::Message;
use crate::retrieval::{ContextPrioritizer, RetrievalContext};
use crate::storage::SqliteStorage;
use crate::summarizer::{ConversationSummarizer, ConversationSummary};

/// What happened to a piece of content offered to the engine
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Id of the new memory; `None` when the content was not stored
    pub memory_id: Option<String>,
    pub decision: AdmissionDecision,
    pub storage_cluster: Option<Uuid>,
    pub topic: Option<TopicAssignment>,

    /// Older memories dropped because their fingerprints hit the TTL or cap
    pub purged: Vec<String>,
}

impl IngestOutcome {
    pub fn stored(&self) -> bool {
        self.memory_id.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotStats {
    pub fingerprints: usize,
    pub items: usize,
    pub clusters: usize,
    pub summaries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub memories: usize,
    pub dedup: DedupStats,
    pub topics: ClusterStats,
}

/// Builder for [`MemoryEngine`]; every collaborator is optional
pub struct MemoryEngineBuilder {
    config: Config,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerativeTextProvider>>,
    fact_extractor: Option<Arc<dyn FactExtractor>>,
    token_counter: Option<Arc<TokenCounter>>,
}

impl MemoryEngineBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn GenerativeTextProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn fact_extractor(mut self, extractor: Arc<dyn FactExtractor>) -> Self {
        self.fact_extractor = Some(extractor);
        self
    }

    pub fn token_counter(mut self, counter: Arc<TokenCounter>) -> Self {
        self.token_counter = Some(counter);
        self
    }

    pub fn build(self) -> Result<MemoryEngine> {
        self.config.validate()?;
        let timeout = self.config.collaborator_timeout();

        let dedup = Deduplicator::new(self.config.dedup.clone(), self.embedder.clone(), timeout);
        let clusterer = TopicClusterer::new(
            self.config.clustering.clone(),
            self.embedder.clone(),
            self.generator.clone(),
            timeout,
        );
        let mut prioritizer = ContextPrioritizer::new(
            self.config.prioritizer.clone(),
            self.embedder.clone(),
            timeout,
        );
        let mut summarizer = ConversationSummarizer::new(
            self.config.summarizer.clone(),
            self.generator.clone(),
            self.fact_extractor.clone(),
            timeout,
        );
        if let Some(counter) = self.token_counter {
            prioritizer = prioritizer.with_token_counter(counter.clone());
            summarizer = summarizer.with_token_counter(counter);
        }

        tracing::info!(
            "Memory engine ready (embedder: {}, generator: {}, fact extractor: {})",
            self.embedder.is_some(),
            self.generator.is_some(),
            self.fact_extractor.is_some()
        );

        Ok(MemoryEngine {
            config: self.config,
            dedup,
            clusterer,
            prioritizer,
            summarizer,
            items: RwLock::new(HashMap::new()),
        })
    }
}

pub struct MemoryEngine {
    config: Config,
    dedup: Deduplicator,
    clusterer: TopicClusterer,
    prioritizer: ContextPrioritizer,
    summarizer: ConversationSummarizer,
    items: RwLock<HashMap<String, ContextItem>>,
}

impl MemoryEngine {
    pub fn builder(config: Config) -> MemoryEngineBuilder {
        MemoryEngineBuilder {
            config,
            embedder: None,
            generator: None,
            fact_extractor: None,
            token_counter: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn clusterer(&self) -> &TopicClusterer {
        &self.clusterer
    }

    pub fn prioritizer(&self) -> &ContextPrioritizer {
        &self.prioritizer
    }

    pub fn summarizer(&self) -> &ConversationSummarizer {
        &self.summarizer
    }

    /// Offer content to memory: deduplicate, fingerprint, classify and keep it
    pub async fn ingest(
        &self,
        user_id: &str,
        content: &str,
        memory_type: MemoryType,
    ) -> IngestOutcome {
        let decision = self.dedup.should_store(content, memory_type).await;
        if !decision.admit {
            tracing::debug!(
                "Not storing content for {}: {:?} (similarity {:.3})",
                user_id,
                decision.reason,
                decision.similarity
            );
            return IngestOutcome {
                memory_id: None,
                decision,
                storage_cluster: None,
                topic: None,
                purged: Vec::new(),
            };
        }

        let memory_id = Uuid::new_v4().to_string();
        let registration = self.dedup.register(&memory_id, content, memory_type).await;
        self.drop_purged(&registration.purged);
        let embedding = self.dedup.embedding_of(&memory_id);
        let topic = self
            .clusterer
            .classify_with_embedding(&memory_id, content, embedding.clone())
            .await;

        let mut item = ContextItem::new(&memory_id, user_id, memory_type, content.trim())
            .with_keywords(topic.keywords.clone());
        item.embedding = embedding;
        self.items.write().insert(memory_id.clone(), item);

        let rebuild = self.clusterer.recluster(false);
        if rebuild.skipped.is_none() {
            tracing::info!(
                "Periodic recluster produced {} topics",
                rebuild.clusters_after
            );
        }

        IngestOutcome {
            memory_id: Some(memory_id),
            decision,
            storage_cluster: Some(registration.storage_cluster),
            topic: Some(topic),
            purged: registration.purged,
        }
    }

    /// Memories whose fingerprints were purged are no longer deduplicated
    /// against, so they leave the engine as well
    fn drop_purged(&self, purged: &[String]) {
        if purged.is_empty() {
            return;
        }
        let mut items = self.items.write();
        for memory_id in purged {
            items.remove(memory_id);
            self.clusterer.forget(memory_id);
        }
        tracing::info!("Dropped {} memories with purged fingerprints", purged.len());
    }

    /// Rank the user's memories for `query` and package them with recent turns
    pub async fn retrieve(
        &self,
        user_id: &str,
        query: &str,
        recent_messages: Vec<Message>,
        limit: usize,
    ) -> RetrievalContext {
        let candidates = self.items_for_user(user_id);
        let context = self
            .prioritizer
            .build_context(query, user_id, candidates, recent_messages, limit)
            .await;

        let mut items = self.items.write();
        for selected in &context.items {
            if let Some(stored) = items.get_mut(&selected.id) {
                stored.access_count = selected.access_count;
                stored.last_accessed = selected.last_accessed;
            }
        }
        context
    }

    /// Summarize `turns` when they are due, keeping the summary as a memory
    pub async fn maybe_summarize(
        &self,
        user_id: &str,
        turns: &[Message],
    ) -> Option<ConversationSummary> {
        if !self.summarizer.should_summarize(user_id, turns) {
            return None;
        }
        let summary = self.summarizer.summarize(user_id, turns).await?;

        let text = &summary.summary_text;
        let item = ContextItem::new(&summary.id, user_id, MemoryType::Summary, text)
            .with_timestamp(summary.span.end)
            .with_keywords(summary.topics.clone());
        self.items.write().insert(summary.id.clone(), item);
        Some(summary)
    }

    pub fn recluster(&self, force: bool) -> ReclusterStats {
        self.clusterer.recluster(force)
    }

    /// Near-duplicate report over one user's memories
    pub fn optimize_storage(&self, user_id: &str) -> OptimizationReport {
        let ids: Vec<String> = self
            .items
            .read()
            .values()
            .filter(|i| i.user_id == user_id)
            .map(|i| i.id.clone())
            .collect();
        self.dedup.optimize_storage(&ids)
    }

    /// Remove a memory from every component
    pub fn forget(&self, memory_id: &str) -> bool {
        let removed = self.items.write().remove(memory_id).is_some();
        self.dedup.remove(memory_id);
        self.clusterer.forget(memory_id);
        removed
    }

    pub fn item(&self, memory_id: &str) -> Option<ContextItem> {
        self.items.read().get(memory_id).cloned()
    }

    /// All memories of a user, oldest first
    pub fn items_for_user(&self, user_id: &str) -> Vec<ContextItem> {
        let mut items: Vec<ContextItem> = self
            .items
            .read()
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        items
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            memories: self.items.read().len(),
            dedup: self.dedup.stats(),
            topics: self.clusterer.stats(),
        }
    }

    /// Write the full engine state to `storage`, replacing what was there
    pub fn save_snapshot(&self, storage: &SqliteStorage) -> Result<SnapshotStats> {
        let items: Vec<ContextItem> = self.items.read().values().cloned().collect();
        let summaries = self.summarizer.latest_summaries();

        let stats = SnapshotStats {
            fingerprints: storage.replace_fingerprints(&self.dedup.snapshot())?,
            items: storage.replace_items(&items)?,
            clusters: storage.replace_clusters(&self.clusterer.clusters())?,
            summaries: summaries.len(),
        };
        for summary in &summaries {
            storage.save_summary(summary)?;
        }

        tracing::info!(
            "Saved snapshot: {} fingerprints, {} memories, {} topics, {} summaries",
            stats.fingerprints,
            stats.items,
            stats.clusters,
            stats.summaries
        );
        Ok(stats)
    }

    /// Replace the engine state with a snapshot from `storage`
    pub fn load_snapshot(&self, storage: &SqliteStorage) -> Result<SnapshotStats> {
        let records = storage.load_fingerprints()?;
        let embeddings: HashMap<String, Vec<f32>> = records
            .iter()
            .filter_map(|r| r.embedding.clone().map(|e| (r.memory_id.clone(), e)))
            .collect();

        let items = storage.load_items()?;
        let clusters = storage.load_clusters()?;
        let summaries = storage.load_summaries()?;

        let stats = SnapshotStats {
            fingerprints: records.len(),
            items: items.len(),
            clusters: clusters.len(),
            summaries: summaries.len(),
        };

        let purged = self.dedup.restore(records);
        self.clusterer.restore(clusters, &embeddings);
        self.summarizer.restore(summaries);

        let mut restored = HashMap::with_capacity(items.len());
        for mut item in items {
            item.embedding = embeddings.get(&item.id).cloned();
            restored.insert(item.id.clone(), item);
        }
        *self.items.write() = restored;
        self.drop_purged(&purged);

        tracing::info!(
            "Loaded snapshot: {} fingerprints, {} memories, {} topics, {} summaries",
            stats.fingerprints,
            stats.items,
            stats.clusters,
            stats.summaries
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::AdmissionReason;
    use crate::message::Role;
    use crate::testing::HashingEmbedder;

    fn engine() -> MemoryEngine {
        MemoryEngine::builder(Config::default())
            .embedder(Arc::new(HashingEmbedder::default()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_stores_then_rejects_duplicate() {
        let engine = engine();
        let first = engine
            .ingest("alice", "Alice keeps three beehives on her roof", MemoryType::Fact)
            .await;
        assert!(first.stored());
        assert!(first.topic.as_ref().unwrap().created);

        let again = engine
            .ingest("alice", "Alice keeps three beehives on her roof", MemoryType::Fact)
            .await;
        assert!(!again.stored());
        assert_eq!(again.decision.reason, AdmissionReason::ExactDuplicate);
        assert_eq!(again.decision.similar_memory_id, first.memory_id);
        assert_eq!(engine.stats().memories, 1);
    }

    #[tokio::test]
    async fn test_short_content_is_not_stored() {
        let engine = engine();
        let outcome = engine.ingest("alice", "ok", MemoryType::Conversation).await;
        assert!(!outcome.stored());
        assert_eq!(outcome.decision.reason, AdmissionReason::TooShort);
    }

    #[tokio::test]
    async fn test_retrieve_is_scoped_to_user_and_updates_access() {
        let engine = engine();
        let alice = engine
            .ingest("alice", "Alice is training for a marathon in October", MemoryType::Fact)
            .await
            .memory_id
            .unwrap();
        engine
            .ingest("bob", "Bob is training for a marathon in October too", MemoryType::Fact)
            .await;

        let context = engine.retrieve("alice", "marathon training", Vec::new(), 5).await;
        assert_eq!(context.items.len(), 1);
        assert_eq!(context.items[0].id, alice);
        assert_eq!(engine.item(&alice).unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_forget_removes_everywhere() {
        let engine = engine();
        let id = engine
            .ingest("alice", "Alice's favourite tea is genmaicha", MemoryType::Profile)
            .await
            .memory_id
            .unwrap();

        assert!(engine.forget(&id));
        assert!(engine.item(&id).is_none());
        assert!(engine.dedup().fingerprint(&id).is_none());
        assert!(engine.clusterer().cluster_of(&id).is_none());

        let again = engine
            .ingest("alice", "Alice's favourite tea is genmaicha", MemoryType::Profile)
            .await;
        assert!(again.stored());
    }

    #[tokio::test]
    async fn test_due_summary_becomes_a_memory() {
        let engine = engine();
        let turns: Vec<Message> = (0..51)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                Message::new("alice", "c1", role, format!("turn {i} about sourdough baking"))
            })
            .collect();

        assert!(engine.maybe_summarize("alice", &turns[..2]).await.is_none());
        let summary = engine.maybe_summarize("alice", &turns).await.unwrap();
        let item = engine.item(&summary.id).unwrap();
        assert_eq!(item.memory_type, MemoryType::Summary);
        assert_eq!(item.content, summary.summary_text);
    }

    #[tokio::test]
    async fn test_fingerprint_cap_drops_memories_everywhere() {
        let mut config = Config::default();
        config.dedup.max_fingerprints = 2;
        let engine = MemoryEngine::builder(config)
            .embedder(Arc::new(HashingEmbedder::default()))
            .build()
            .unwrap();

        let facts = [
            "First memory about gardening tomatoes",
            "Second memory about learning violin",
            "Third memory about marathon training",
        ];
        let mut ids = Vec::new();
        for fact in facts {
            let outcome = engine.ingest("alice", fact, MemoryType::Fact).await;
            ids.push(outcome.memory_id.clone().unwrap());
            if ids.len() == 3 {
                assert_eq!(outcome.purged, vec![ids[0].clone()]);
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert!(engine.item(&ids[0]).is_none());
        assert!(engine.clusterer().cluster_of(&ids[0]).is_none());
        assert_eq!(engine.stats().memories, 2);
        assert_eq!(engine.stats().topics.items, 2);

        // The purged fact may come back, but only ever as a single copy
        let again = engine.ingest("alice", facts[0], MemoryType::Fact).await;
        assert!(again.stored());
        let stats = engine.stats();
        assert_eq!(stats.memories, 2);
        assert_eq!(stats.dedup.fingerprints, 2);
        assert_eq!(stats.topics.items, 2);
        let copies = engine
            .items_for_user("alice")
            .iter()
            .filter(|i| i.content == facts[0])
            .count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn test_zero_fingerprint_cap_is_rejected() {
        let mut config = Config::default();
        config.dedup.max_fingerprints = 0;
        assert!(MemoryEngine::builder(config).build().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let engine = engine();
        let id = engine
            .ingest("alice", "Alice plays cello in a community orchestra", MemoryType::Fact)
            .await
            .memory_id
            .unwrap();
        let storage = SqliteStorage::in_memory().unwrap();
        let saved = engine.save_snapshot(&storage).unwrap();
        assert_eq!(saved.items, 1);
        assert_eq!(saved.fingerprints, 1);
        assert_eq!(saved.clusters, 1);

        let restored = self::engine();
        let loaded = restored.load_snapshot(&storage).unwrap();
        assert_eq!(loaded.items, 1);
        assert!(restored.item(&id).unwrap().embedding.is_some());
        assert_eq!(
            restored.clusterer().cluster_of(&id),
            engine.clusterer().cluster_of(&id)
        );

        let duplicate = restored
            .ingest("alice", "Alice plays cello in a community orchestra", MemoryType::Fact)
            .await;
        assert!(!duplicate.stored());
    }
}
