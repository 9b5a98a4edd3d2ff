//! Context prioritization for prompt injection
//!
//! Candidates are scored on six signals (semantic, temporal, frequency,
//! interaction, emotional, topic), combined with configurable weights, ranked
//! and filtered for diversity. Every item that makes it into a result counts
//! as used: its access statistics and the user's interaction history update.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::TtlCache;
use crate::config::{PrioritizerConfig, ScoringWeights};
use crate::embedding::{count_tokens, embed_or_none, EmbeddingProvider, TokenCounter};
use crate::memory::{ComponentScores, ContextItem, MemoryType};
use crate::message::Message;
use crate::similarity::cosine_similarity;
use crate::text::{content_words, has_emotional_language, jaccard, overlap_ratio};

const SECONDS_PER_DAY: f64 = 86_400.0;
const RECENT_BOOST: f32 = 1.2;
const RECENCY_COMPOSITE_BOOST: f32 = 1.1;
const EMOTION_COMPOSITE_BOOST: f32 = 1.05;
const FREQUENT_TOPIC_BOOST: f32 = 0.2;
const FREQUENT_TOPIC_COUNT: usize = 5;
const TOPICS_COUNTED_PER_ITEM: usize = 3;

/// Feedback below this level nudges the related weights up
const LOW_FEEDBACK: f32 = 0.6;
const WEIGHT_STEP: f32 = 0.05;

/// Retrieved context ready for injection into prompts
#[derive(Debug, Clone, Default)]
pub struct RetrievalContext {
    /// Prioritized memories, best first
    pub items: Vec<ContextItem>,

    /// Recent conversation history
    pub recent_messages: Vec<Message>,

    /// Total tokens in this context
    pub total_tokens: u32,
}

impl RetrievalContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.recent_messages.is_empty()
    }

    /// Format the context for injection into a prompt
    pub fn format_for_prompt(&self) -> String {
        let mut parts = Vec::new();

        if !self.items.is_empty() {
            parts.push("## Relevant Memories\n".to_string());
            for item in &self.items {
                parts.push(format!("- [{}] {}\n", item.memory_type, item.content));
            }
        }

        if !self.recent_messages.is_empty() {
            parts.push("\n## Recent Conversation Context\n".to_string());
            for msg in &self.recent_messages {
                parts.push(format!("{}: {}\n", msg.role, msg.content));
            }
        }

        parts.join("")
    }
}

/// Caller feedback about how well recent context served
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub response_quality: f32,
    pub relevance: f32,
    pub user_satisfaction: f32,
}

#[derive(Debug, Clone, Copy)]
struct CachedScore {
    scores: ComponentScores,
    final_score: f32,
    confidence: f32,
}

#[derive(Debug, Default)]
struct UserHistory {
    selections: u32,
    by_type: HashMap<MemoryType, u32>,
    by_item: HashMap<String, u32>,
    by_topic: HashMap<String, u32>,
}

impl UserHistory {
    fn interaction(&self, item: &ContextItem) -> f32 {
        if self.selections == 0 {
            return 0.0;
        }
        let of_type = self.by_type.get(&item.memory_type).copied().unwrap_or(0);
        let type_share = of_type as f32 / self.selections as f32;
        let max_item = self.by_item.values().copied().max().unwrap_or(0);
        let item_share = if max_item == 0 {
            0.0
        } else {
            self.by_item.get(&item.id).copied().unwrap_or(0) as f32 / max_item as f32
        };
        (0.5 * type_share + 0.5 * item_share).clamp(0.0, 1.0)
    }

    fn top_topics(&self, n: usize) -> Vec<String> {
        let mut ranked: Vec<(&String, &u32)> = self.by_topic.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(n).map(|(t, _)| t.clone()).collect()
    }

    fn record(&mut self, item: &ContextItem) {
        self.selections += 1;
        *self.by_type.entry(item.memory_type).or_insert(0) += 1;
        *self.by_item.entry(item.id.clone()).or_insert(0) += 1;
        for topic in item.effective_keywords().into_iter().take(TOPICS_COUNTED_PER_ITEM) {
            *self.by_topic.entry(topic).or_insert(0) += 1;
        }
    }
}

/// Per-query values shared by every candidate
struct QueryFeatures {
    words: Vec<String>,
    embedding: Option<Vec<f32>>,
    emotional: bool,
}

/// Multi-signal ranker for context candidates
pub struct ContextPrioritizer {
    config: PrioritizerConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    token_counter: Option<Arc<TokenCounter>>,
    timeout: Duration,
    weights: RwLock<ScoringWeights>,
    history: RwLock<HashMap<String, UserHistory>>,
    score_cache: TtlCache<(String, String, String), CachedScore>,
}

impl ContextPrioritizer {
    pub fn new(
        config: PrioritizerConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        timeout: Duration,
    ) -> Self {
        let score_cache = TtlCache::new(
            Duration::from_secs(config.score_cache_ttl_secs),
            config.score_cache_max_entries,
        );
        Self {
            weights: RwLock::new(config.weights),
            config,
            embedder,
            token_counter: None,
            timeout,
            history: RwLock::new(HashMap::new()),
            score_cache,
        }
    }

    /// Count context tokens with a real tokenizer instead of the estimate
    pub fn with_token_counter(mut self, counter: Arc<TokenCounter>) -> Self {
        self.token_counter = Some(counter);
        self
    }

    pub fn weights(&self) -> ScoringWeights {
        *self.weights.read()
    }

    pub fn cached_scores(&self) -> usize {
        self.score_cache.len()
    }

    /// Rank `candidates` for `query` and keep at most `limit` of them
    pub async fn prioritize(
        &self,
        query: &str,
        user_id: &str,
        candidates: Vec<ContextItem>,
        limit: usize,
    ) -> Vec<ContextItem> {
        self.prioritize_at(query, user_id, candidates, limit, Utc::now()).await
    }

    /// [`prioritize`](Self::prioritize) against an explicit clock
    pub async fn prioritize_at(
        &self,
        query: &str,
        user_id: &str,
        candidates: Vec<ContextItem>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<ContextItem> {
        if candidates.is_empty() || limit == 0 {
            return Vec::new();
        }

        let query_features = QueryFeatures {
            words: content_words(query),
            embedding: embed_or_none(self.embedder.as_deref(), query, self.timeout).await,
            emotional: has_emotional_language(query),
        };

        let mut candidates = candidates;
        if query_features.embedding.is_some() {
            for item in candidates.iter_mut().filter(|i| i.embedding.is_none()) {
                item.embedding =
                    embed_or_none(self.embedder.as_deref(), &item.content, self.timeout).await;
            }
        }

        let candidate_count = candidates.len();
        let weights = self.weights();

        {
            let history = self.history.read();
            let user_history = history.get(user_id);
            let top_topics = user_history
                .map(|h| h.top_topics(FREQUENT_TOPIC_COUNT))
                .unwrap_or_default();

            for item in candidates.iter_mut() {
                let key = (item.id.clone(), query.to_string(), user_id.to_string());
                let scored = match self.score_cache.get(&key) {
                    Some(cached) => cached,
                    None => {
                        let scores = self.component_scores(
                            item,
                            &query_features,
                            user_history,
                            &top_topics,
                            now,
                        );
                        let scored = CachedScore {
                            scores,
                            final_score: composite(&scores, &weights),
                            confidence: confidence(&scores),
                        };
                        self.score_cache.insert(key, scored);
                        scored
                    }
                };
                item.scores = scored.scores;
                item.final_score = scored.final_score;
                item.confidence = scored.confidence;
            }
        }

        candidates.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let cap = limit.min(self.config.max_context_items);
        let diversify = candidate_count >= self.config.min_candidates_for_diversity;
        let max_similarity = 1.0 - self.config.diversity_factor;

        let mut selected: Vec<ContextItem> = Vec::with_capacity(cap);
        for item in candidates {
            if selected.len() >= cap {
                break;
            }
            if diversify && selected.iter().any(|s| item_similarity(s, &item) > max_similarity) {
                tracing::debug!("Skipping {} as too similar to selected context", item.id);
                continue;
            }
            selected.push(item);
        }

        {
            let mut history = self.history.write();
            let user_history = history.entry(user_id.to_string()).or_default();
            for item in selected.iter_mut() {
                item.mark_used(now);
                user_history.record(item);
            }
        }

        tracing::debug!(
            "Prioritized {} of {} candidates for user {}",
            selected.len(),
            candidate_count,
            user_id
        );
        selected
    }

    fn component_scores(
        &self,
        item: &ContextItem,
        query: &QueryFeatures,
        history: Option<&UserHistory>,
        top_topics: &[String],
        now: DateTime<Utc>,
    ) -> ComponentScores {
        let item_words = content_words(&item.content);

        let semantic = match (&query.embedding, &item.embedding) {
            (Some(q), Some(e)) => cosine_similarity(q, e).clamp(0.0, 1.0),
            _ => overlap_ratio(&query.words, &item_words),
        };

        let age_days = days_between(item.timestamp, now);
        let mut temporal = (-age_days / self.config.temporal_decay_days).exp() as f32;
        if age_days < 1.0 {
            temporal *= RECENT_BOOST;
        }

        let frequency = if item.access_count == 0 {
            0.0
        } else {
            let saturation = self.config.frequency_saturation.max(1);
            let count = item.access_count.min(saturation) as f32 / saturation as f32;
            let idle_days = item.last_accessed.map_or(0.0, |at| days_between(at, now));
            count * (-idle_days / self.config.frequency_decay_days).exp() as f32
        };

        let interaction = history.map_or(0.0, |h| h.interaction(item));

        let item_emotional = has_emotional_language(&item.content);
        let emotional = if query.emotional && item_emotional {
            1.0
        } else if item.memory_type == MemoryType::Emotional {
            0.8
        } else if query.emotional || item_emotional {
            0.6
        } else {
            0.0
        };

        let keywords = item.effective_keywords();
        let mut topic = overlap_ratio(&query.words, &keywords);
        if keywords.iter().any(|k| top_topics.contains(k)) {
            topic += FREQUENT_TOPIC_BOOST;
        }

        ComponentScores {
            semantic,
            temporal: temporal.clamp(0.0, 1.0),
            frequency: frequency.clamp(0.0, 1.0),
            interaction,
            emotional,
            topic: topic.clamp(0.0, 1.0),
        }
    }

    /// Rank candidates and package them with recent history for a prompt
    pub async fn build_context(
        &self,
        query: &str,
        user_id: &str,
        candidates: Vec<ContextItem>,
        recent_messages: Vec<Message>,
        limit: usize,
    ) -> RetrievalContext {
        let items = self.prioritize(query, user_id, candidates, limit).await;

        let counter = self.token_counter.as_deref();
        let item_tokens: u32 = items.iter().map(|i| count_tokens(counter, &i.content)).sum();
        let message_tokens: u32 = recent_messages
            .iter()
            .map(|m| count_tokens(counter, &m.content))
            .sum();

        RetrievalContext {
            items,
            recent_messages,
            total_tokens: item_tokens + message_tokens,
        }
    }

    /// Nudge weights toward the signals that poor feedback points at
    ///
    /// Each weight is capped at `max_weight`. Cached scores were computed with
    /// the old weights and are dropped.
    pub fn adjust_weights(&self, metrics: &PerformanceMetrics) -> ScoringWeights {
        let cap = self.config.max_weight;
        let bump = |w: &mut f32, by: f32| *w = (*w + by).min(cap);

        let adjusted = {
            let mut weights = self.weights.write();
            if metrics.relevance < LOW_FEEDBACK {
                bump(&mut weights.semantic, WEIGHT_STEP);
                bump(&mut weights.topic, WEIGHT_STEP / 2.0);
            }
            if metrics.response_quality < LOW_FEEDBACK {
                bump(&mut weights.temporal, WEIGHT_STEP);
                bump(&mut weights.frequency, WEIGHT_STEP / 2.0);
            }
            if metrics.user_satisfaction < LOW_FEEDBACK {
                bump(&mut weights.interaction, WEIGHT_STEP);
                bump(&mut weights.emotional, WEIGHT_STEP / 2.0);
            }
            *weights
        };

        self.score_cache.clear();
        tracing::info!("Adjusted scoring weights: {:?}", adjusted);
        adjusted
    }
}

fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    ((later - earlier).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0)
}

fn composite(scores: &ComponentScores, weights: &ScoringWeights) -> f32 {
    let mut score = weights.semantic * scores.semantic
        + weights.temporal * scores.temporal
        + weights.frequency * scores.frequency
        + weights.interaction * scores.interaction
        + weights.emotional * scores.emotional
        + weights.topic * scores.topic;

    if scores.temporal > 0.8 {
        score *= RECENCY_COMPOSITE_BOOST;
    }
    if scores.emotional > 0.7 {
        score *= EMOTION_COMPOSITE_BOOST;
    }
    score.clamp(0.0, 1.0)
}

fn confidence(scores: &ComponentScores) -> f32 {
    let signals = scores.as_array();
    let strong = signals.iter().filter(|s| **s > 0.5).count() as f32 / signals.len() as f32;
    let bonus = if signals.iter().any(|s| *s > 0.8) { 0.1 } else { 0.0 };
    (strong + bonus).clamp(0.0, 1.0)
}

/// Embedding similarity, falling back to content-word Jaccard
fn item_similarity(a: &ContextItem, b: &ContextItem) -> f32 {
    match (&a.embedding, &b.embedding) {
        (Some(x), Some(y)) => cosine_similarity(x, y),
        _ => jaccard(&content_words(&a.content), &content_words(&b.content)),
    }
}
