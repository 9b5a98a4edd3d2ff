//! Conversation summarization
//!
//! Long or stale conversations are compressed into a [`ConversationSummary`]:
//! topics, high-confidence facts, the emotional arc, a condensed turn flow,
//! retrieval tags and a short free-text summary. Summaries are immutable; a
//! later summary for the same user records the one it supersedes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::TtlCache;
use crate::config::SummarizerConfig;
use crate::embedding::{count_tokens, TokenCounter};
use crate::generation::{
    complete_or_none, extract_facts_or_empty, parse_string_list, ExtractedFact, FactExtractor,
    GenerativeTextProvider, PromptMessage,
};
use crate::message::{total_chars, transcript, Message, Role};
use crate::text::{
    classify_intent, rank_by_frequency, content_words, sentiment_counts, truncate_chars, Intent,
    Sentiment,
};

const MIN_TOPICS: usize = 3;
const MAX_TOPICS: usize = 7;
const FALLBACK_TOPICS: usize = 5;
const MIN_SUMMARY_TOKENS: u32 = 64;

/// Longest transcript handed to the generator, in characters
const PROMPT_TRANSCRIPT_CHARS: usize = 12_000;

/// Direction of the emotional arc across a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trajectory {
    Improving,
    Declining,
    Changing,
    Stable,
}

impl std::fmt::Display for Trajectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trajectory::Improving => write!(f, "improving"),
            Trajectory::Declining => write!(f, "declining"),
            Trajectory::Changing => write!(f, "changing"),
            Trajectory::Stable => write!(f, "stable"),
        }
    }
}

/// Dominant sentiment of each third of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionalEvolution {
    pub start: Sentiment,
    pub middle: Sentiment,
    pub end: Sentiment,
    pub trajectory: Trajectory,
}

impl EmotionalEvolution {
    pub fn from_turns(turns: &[Message]) -> Self {
        let start = dominant_sentiment(third(turns, 0));
        let middle = dominant_sentiment(third(turns, 1));
        let end = dominant_sentiment(third(turns, 2));

        let trajectory = match valence(end).cmp(&valence(start)) {
            std::cmp::Ordering::Greater => Trajectory::Improving,
            std::cmp::Ordering::Less => Trajectory::Declining,
            std::cmp::Ordering::Equal if middle != start => Trajectory::Changing,
            std::cmp::Ordering::Equal => Trajectory::Stable,
        };

        Self {
            start,
            middle,
            end,
            trajectory,
        }
    }
}

/// The `index`-th third of `turns`; never empty for a non-empty slice
fn third(turns: &[Message], index: usize) -> &[Message] {
    let n = turns.len();
    if n == 0 {
        return turns;
    }
    let lo = (index * n / 3).min(n - 1);
    let hi = ((index + 1) * n / 3).max(lo + 1).min(n);
    &turns[lo..hi]
}

fn dominant_sentiment(turns: &[Message]) -> Sentiment {
    let (positive, negative) = turns
        .iter()
        .map(|t| sentiment_counts(&t.content))
        .fold((0, 0), |(p, n), (tp, tn)| (p + tp, n + tn));
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

fn valence(sentiment: Sentiment) -> i8 {
    match sentiment {
        Sentiment::Negative => -1,
        Sentiment::Neutral => 0,
        Sentiment::Positive => 1,
    }
}

/// One user turn and the reply it got
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub intent: Intent,
    pub user_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_excerpt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Compressed record of a stretch of conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// `sum_` followed by a hash of the user and time span
    pub id: String,
    pub user_id: String,
    pub span: TimeSpan,
    pub turn_count: usize,
    pub topics: Vec<String>,
    pub facts: Vec<ExtractedFact>,
    pub emotional_evolution: EmotionalEvolution,
    pub flow: Vec<FlowEntry>,
    pub tags: Vec<String>,
    pub summary_text: String,

    /// Summary length over original length, in characters
    pub compression_ratio: f32,
    pub original_tokens: u32,
    pub summary_tokens: u32,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

/// Deterministic summary id for a user and time span
pub fn summary_id(user_id: &str, span: &TimeSpan) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(span.start.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(span.end.to_rfc3339().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("sum_{}", &digest[..16])
}

pub struct ConversationSummarizer {
    config: SummarizerConfig,
    generator: Option<Arc<dyn GenerativeTextProvider>>,
    fact_extractor: Option<Arc<dyn FactExtractor>>,
    token_counter: Option<Arc<TokenCounter>>,
    timeout: Duration,
    cache: TtlCache<String, ConversationSummary>,
    latest: RwLock<HashMap<String, ConversationSummary>>,
}

impl ConversationSummarizer {
    pub fn new(
        config: SummarizerConfig,
        generator: Option<Arc<dyn GenerativeTextProvider>>,
        fact_extractor: Option<Arc<dyn FactExtractor>>,
        timeout: Duration,
    ) -> Self {
        let cache = TtlCache::new(
            Duration::from_secs(config.summary_ttl_secs),
            config.summary_cache_max_entries,
        );
        Self {
            config,
            generator,
            fact_extractor,
            token_counter: None,
            timeout,
            cache,
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_token_counter(mut self, counter: Arc<TokenCounter>) -> Self {
        self.token_counter = Some(counter);
        self
    }

    /// Whether `turns` are due for summarization
    pub fn should_summarize(&self, user_id: &str, turns: &[Message]) -> bool {
        self.should_summarize_at(user_id, turns, Utc::now())
    }

    pub fn should_summarize_at(
        &self,
        user_id: &str,
        turns: &[Message],
        now: DateTime<Utc>,
    ) -> bool {
        if turns.len() > self.config.max_turns {
            tracing::debug!("{} turns for {} exceed the cap", turns.len(), user_id);
            return true;
        }
        if turns.len() < self.config.min_turns {
            return false;
        }

        let staleness = chrono::Duration::hours(self.config.staleness_hours);
        let stale = turns
            .iter()
            .map(|t| t.timestamp)
            .max()
            .is_some_and(|latest| now - latest > staleness);
        let large = total_chars(turns) > self.config.size_threshold_chars;
        stale || large
    }

    /// Summarize `turns`; `None` when there is nothing to summarize
    pub async fn summarize(&self, user_id: &str, turns: &[Message]) -> Option<ConversationSummary> {
        let (Some(start), Some(end)) = (
            turns.iter().map(|t| t.timestamp).min(),
            turns.iter().map(|t| t.timestamp).max(),
        ) else {
            tracing::info!("No turns to summarize for {}, no action taken", user_id);
            return None;
        };

        let span = TimeSpan { start, end };
        let id = summary_id(user_id, &span);
        if let Some(cached) = self.cache.get(&id) {
            tracing::debug!("Returning cached summary {}", id);
            return Some(cached);
        }

        let original = transcript(turns);
        let original_tokens = count_tokens(self.token_counter.as_deref(), &original);

        let topics = self.extract_topics(turns, &original).await;
        let facts = self.extract_facts(&original).await;
        let emotional_evolution = EmotionalEvolution::from_turns(turns);
        let flow = self.condense_flow(turns);
        let tags = self.build_tags(&topics, &facts, &span, turns.len());
        let summary_text = self
            .summary_text(
                &original,
                original_tokens,
                &topics,
                &emotional_evolution,
                &span,
                turns.len(),
            )
            .await;

        let original_chars = original.chars().count();
        let compression_ratio = if original_chars == 0 {
            0.0
        } else {
            summary_text.chars().count() as f32 / original_chars as f32
        };
        let summary_tokens = count_tokens(self.token_counter.as_deref(), &summary_text);

        let mut summary = ConversationSummary {
            id: id.clone(),
            user_id: user_id.to_string(),
            span,
            turn_count: turns.len(),
            topics,
            facts,
            emotional_evolution,
            flow,
            tags,
            summary_text,
            compression_ratio,
            original_tokens,
            summary_tokens,
            created_at: Utc::now(),
            supersedes: None,
        };

        {
            let mut latest = self.latest.write();
            summary.supersedes = latest
                .get(user_id)
                .map(|previous| previous.id.clone())
                .filter(|previous| *previous != id);
            latest.insert(user_id.to_string(), summary.clone());
        }
        self.cache.insert(id, summary.clone());

        tracing::info!(
            "Summarized {} turns for {} into {} ({} topics, {} facts, ratio {:.2})",
            summary.turn_count,
            user_id,
            summary.id,
            summary.topics.len(),
            summary.facts.len(),
            summary.compression_ratio
        );
        Some(summary)
    }

    async fn extract_topics(&self, turns: &[Message], original: &str) -> Vec<String> {
        let messages = [
            PromptMessage::system(
                "List the 3 to 7 main topics of this conversation. \
                 Reply with a JSON array of short lowercase strings and nothing else.",
            ),
            PromptMessage::user(truncate_chars(original, PROMPT_TRANSCRIPT_CHARS)),
        ];

        let response =
            complete_or_none(self.generator.as_deref(), &messages, 100, 0.2, self.timeout).await;
        let frequent = || {
            rank_by_frequency(
                turns.iter().flat_map(|t| content_words(&t.content)),
                FALLBACK_TOPICS,
            )
        };
        match response.as_deref().and_then(parse_string_list) {
            Some(mut topics) => {
                topics.truncate(MAX_TOPICS);
                if topics.len() < MIN_TOPICS {
                    // Short model lists are padded with the most frequent words
                    for word in frequent() {
                        if topics.len() >= MIN_TOPICS {
                            break;
                        }
                        if !topics.contains(&word) {
                            topics.push(word);
                        }
                    }
                }
                topics
            }
            None => frequent(),
        }
    }

    async fn extract_facts(&self, original: &str) -> Vec<ExtractedFact> {
        let mut facts: Vec<ExtractedFact> =
            extract_facts_or_empty(self.fact_extractor.as_deref(), original, self.timeout)
                .await
                .into_iter()
                .filter(|f| f.confidence >= self.config.min_fact_confidence)
                .collect();
        facts.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        facts.truncate(self.config.max_facts);
        facts
    }

    fn condense_flow(&self, turns: &[Message]) -> Vec<FlowEntry> {
        let mut flow = Vec::new();
        for (i, turn) in turns.iter().enumerate() {
            if !turn.is_user() {
                continue;
            }
            let reply = turns[i + 1..]
                .iter()
                .take_while(|t| !t.is_user())
                .find(|t| t.role == Role::Assistant)
                .map(|t| truncate_chars(&t.content, self.config.reply_excerpt_chars));

            flow.push(FlowEntry {
                intent: classify_intent(&turn.content),
                user_excerpt: truncate_chars(&turn.content, self.config.reply_excerpt_chars),
                reply_excerpt: reply,
            });
        }

        let excess = flow.len().saturating_sub(self.config.max_flow_entries);
        flow.split_off(excess)
    }

    fn build_tags(
        &self,
        topics: &[String],
        facts: &[ExtractedFact],
        span: &TimeSpan,
        turn_count: usize,
    ) -> Vec<String> {
        let mut tags: Vec<String> = topics.iter().map(|t| format!("topic:{t}")).collect();
        tags.push(format!("date:{}", span.end.format("%Y-%m-%d")));
        tags.push(format!("hour:{}", span.end.format("%H")));

        let length = if turn_count < self.config.min_turns {
            "short"
        } else if turn_count <= self.config.max_turns {
            "medium"
        } else {
            "long"
        };
        tags.push(format!("length:{length}"));

        if !facts.is_empty() {
            tags.push("has_facts".to_string());
        }
        if turn_count > self.config.max_turns {
            tags.push("extended".to_string());
        }
        tags
    }

    async fn summary_text(
        &self,
        original: &str,
        original_tokens: u32,
        topics: &[String],
        evolution: &EmotionalEvolution,
        span: &TimeSpan,
        turn_count: usize,
    ) -> String {
        let budget = ((original_tokens as f32 * self.config.target_compression) as u32)
            .max(MIN_SUMMARY_TOKENS);
        let messages = [
            PromptMessage::system(format!(
                "Summarize the conversation in at most {budget} tokens. Keep names, \
                 decisions, preferences and open questions. Reply with the summary only."
            )),
            PromptMessage::user(truncate_chars(original, PROMPT_TRANSCRIPT_CHARS)),
        ];

        let generated =
            complete_or_none(self.generator.as_deref(), &messages, budget, 0.3, self.timeout).await;
        match generated {
            Some(text) => text,
            None => {
                let about = if topics.is_empty() {
                    "general chat".to_string()
                } else {
                    topics.join(", ")
                };
                format!(
                    "{} turns between {} and {} about {}; mood {}.",
                    turn_count,
                    span.start.format("%Y-%m-%d %H:%M"),
                    span.end.format("%Y-%m-%d %H:%M"),
                    about,
                    evolution.trajectory
                )
            }
        }
    }

    /// The most recent summary produced for `user_id`
    pub fn latest_for_user(&self, user_id: &str) -> Option<ConversationSummary> {
        self.latest.read().get(user_id).cloned()
    }

    /// Latest summary of every user
    pub fn latest_summaries(&self) -> Vec<ConversationSummary> {
        self.latest.read().values().cloned().collect()
    }

    /// Reload saved summaries; the newest per user becomes its latest
    pub fn restore(&self, summaries: Vec<ConversationSummary>) {
        let mut latest = self.latest.write();
        for summary in summaries {
            let newer = latest
                .get(&summary.user_id)
                .map_or(true, |current| summary.created_at > current.created_at);
            self.cache.insert(summary.id.clone(), summary.clone());
            if newer {
                latest.insert(summary.user_id.clone(), summary);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingGenerator, ScriptedGenerator, StaticFactExtractor};

    fn summarizer() -> ConversationSummarizer {
        ConversationSummarizer::new(SummarizerConfig::default(), None, None, Duration::from_secs(1))
    }

    fn turns(contents: &[&str], start: DateTime<Utc>) -> Vec<Message> {
        contents
            .iter()
            .enumerate()
            .map(|(i, content)| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                Message::new("alice", "c1", role, *content)
                    .with_timestamp(start + chrono::Duration::minutes(i as i64))
            })
            .collect()
    }

    fn chatter(n: usize, start: DateTime<Utc>) -> Vec<Message> {
        let contents: Vec<String> = (0..n).map(|i| format!("turn {i} about gardening")).collect();
        let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
        turns(&refs, start)
    }

    #[test]
    fn test_should_summarize_triggers() {
        let summarizer = summarizer();
        let now = Utc::now();

        assert!(summarizer.should_summarize_at("alice", &chatter(51, now), now));
        assert!(!summarizer.should_summarize_at("alice", &chatter(2, now), now));
        assert!(!summarizer.should_summarize_at("alice", &chatter(12, now), now));

        let stale = chatter(12, now - chrono::Duration::hours(7));
        assert!(summarizer.should_summarize_at("alice", &stale, now));

        let long_turn = "x".repeat(800);
        let large: Vec<&str> = (0..12).map(|_| long_turn.as_str()).collect();
        assert!(summarizer.should_summarize_at("alice", &turns(&large, now), now));
    }

    #[tokio::test]
    async fn test_empty_turns_yield_no_summary() {
        assert!(summarizer().summarize("alice", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_fallback_summary() {
        let summarizer = summarizer();
        let start = Utc::now() - chrono::Duration::hours(2);
        let conversation = turns(
            &[
                "I started a vegetable garden, the garden has tomatoes",
                "That sounds lovely! What are you growing?",
                "Tomatoes and basil in the garden",
                "Basil pairs well with tomatoes.",
            ],
            start,
        );

        let summary = summarizer.summarize("alice", &conversation).await.unwrap();
        assert!(summary.id.starts_with("sum_"));
        assert_eq!(summary.turn_count, 4);
        assert_eq!(summary.span.start, start);
        assert_eq!(summary.topics[0], "garden");
        assert!(summary.topics.contains(&"tomatoes".to_string()));
        assert!(summary.summary_text.starts_with("4 turns between"));
        assert!(!summary.summary_text.contains('\n'));
        assert!(summary.facts.is_empty());
        assert!(summary.tags.contains(&"topic:garden".to_string()));
        assert!(summary.tags.contains(&"length:short".to_string()));
        assert!(!summary.tags.contains(&"has_facts".to_string()));

        let expected = summary.summary_text.chars().count() as f32
            / transcript(&conversation).chars().count() as f32;
        assert!((summary.compression_ratio - expected).abs() < 1e-6);
        assert!(summary.original_tokens > 0);
    }

    #[tokio::test]
    async fn test_same_span_returns_cached_summary() {
        let summarizer = summarizer();
        let conversation = chatter(4, Utc::now());
        let first = summarizer.summarize("alice", &conversation).await.unwrap();
        let second = summarizer.summarize("alice", &conversation).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.supersedes.is_none());
    }

    #[tokio::test]
    async fn test_generator_topics_and_text() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            r#"Topics: ["Gardening", "cooking", "weekend plans", "gardening"]"#.to_string(),
            "  Alice is planting tomatoes and basil.  ".to_string(),
        ]));
        let summarizer = ConversationSummarizer::new(
            SummarizerConfig::default(),
            Some(generator.clone()),
            None,
            Duration::from_secs(1),
        );

        let summary = summarizer
            .summarize("alice", &chatter(6, Utc::now()))
            .await
            .unwrap();
        assert_eq!(summary.topics, vec!["gardening", "cooking", "weekend plans"]);
        assert_eq!(summary.summary_text, "Alice is planting tomatoes and basil.");
        assert_eq!(generator.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_short_topic_list_is_padded_with_frequent_words() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            r#"["hiking"]"#.to_string(),
            "Alice is arranging glacier permits.".to_string(),
        ]));
        let summarizer = ConversationSummarizer::new(
            SummarizerConfig::default(),
            Some(generator),
            None,
            Duration::from_secs(1),
        );

        let conversation = turns(
            &[
                "hiking glacier permits",
                "glacier permits needed",
                "glacier weather forecast",
                "hiking permits glacier",
            ],
            Utc::now(),
        );
        let summary = summarizer.summarize("alice", &conversation).await.unwrap();
        assert_eq!(summary.topics, vec!["hiking", "glacier", "permits"]);
    }

    #[tokio::test]
    async fn test_generator_failure_uses_fallbacks() {
        let summarizer = ConversationSummarizer::new(
            SummarizerConfig::default(),
            Some(Arc::new(FailingGenerator)),
            None,
            Duration::from_secs(1),
        );
        let summary = summarizer
            .summarize("alice", &chatter(6, Utc::now()))
            .await
            .unwrap();
        assert!(summary.topics.contains(&"gardening".to_string()));
        assert!(summary.summary_text.starts_with("6 turns between"));
    }

    #[tokio::test]
    async fn test_facts_are_filtered_and_ranked() {
        let extractor = StaticFactExtractor(vec![
            ExtractedFact {
                fact: "Alice lives in Lisbon".to_string(),
                confidence: 0.75,
            },
            ExtractedFact {
                fact: "Alice might like jazz".to_string(),
                confidence: 0.4,
            },
            ExtractedFact {
                fact: "Alice has a dog".to_string(),
                confidence: 0.95,
            },
        ]);
        let summarizer = ConversationSummarizer::new(
            SummarizerConfig::default(),
            None,
            Some(Arc::new(extractor)),
            Duration::from_secs(1),
        );

        let summary = summarizer
            .summarize("alice", &chatter(4, Utc::now()))
            .await
            .unwrap();
        let facts: Vec<&str> = summary.facts.iter().map(|f| f.fact.as_str()).collect();
        assert_eq!(facts, vec!["Alice has a dog", "Alice lives in Lisbon"]);
        assert!(summary.tags.contains(&"has_facts".to_string()));
    }

    #[test]
    fn test_emotional_evolution() {
        let now = Utc::now();
        let improving = turns(
            &[
                "I feel sad and tired",
                "Sorry to hear that",
                "We talked",
                "Okay",
                "I'm happy now",
                "Great!",
            ],
            now,
        );
        let evolution = EmotionalEvolution::from_turns(&improving);
        assert_eq!(evolution.start, Sentiment::Negative);
        assert_eq!(evolution.end, Sentiment::Positive);
        assert_eq!(evolution.trajectory, Trajectory::Improving);

        let declining = turns(&["This is great", "Glad", "Hmm", "Then it went bad", "Awful"], now);
        assert_eq!(
            EmotionalEvolution::from_turns(&declining).trajectory,
            Trajectory::Declining
        );

        let changing = turns(&["Plain start", "I was furious and upset", "Plain end"], now);
        assert_eq!(
            EmotionalEvolution::from_turns(&changing).trajectory,
            Trajectory::Changing
        );

        let single = turns(&["Just one turn"], now);
        assert_eq!(
            EmotionalEvolution::from_turns(&single).trajectory,
            Trajectory::Stable
        );
    }

    #[tokio::test]
    async fn test_flow_pairs_user_turns_with_replies() {
        let summarizer = summarizer();
        let conversation = turns(
            &[
                "Can you help me plan a trip?",
                "Sure, where to?",
                "Thanks, maybe Porto",
                "Porto is lovely in spring.",
                "Book it!",
            ],
            Utc::now(),
        );
        let summary = summarizer.summarize("alice", &conversation).await.unwrap();

        let intents: Vec<Intent> = summary.flow.iter().map(|f| f.intent).collect();
        assert_eq!(intents, vec![Intent::Question, Intent::Gratitude, Intent::Exclamation]);
        assert_eq!(summary.flow[0].reply_excerpt.as_deref(), Some("Sure, where to?"));
        assert_eq!(summary.flow[2].reply_excerpt, None);

        let long = chatter(40, Utc::now() - chrono::Duration::days(1));
        let bounded = summarizer.summarize("alice", &long).await.unwrap();
        assert_eq!(bounded.flow.len(), 10);
        assert_eq!(bounded.flow[9].user_excerpt, "turn 38 about gardening");
    }

    #[tokio::test]
    async fn test_later_summary_supersedes_earlier() {
        let summarizer = summarizer();
        let first = summarizer
            .summarize("alice", &chatter(4, Utc::now() - chrono::Duration::days(2)))
            .await
            .unwrap();
        let second = summarizer
            .summarize("alice", &chatter(4, Utc::now()))
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.supersedes.as_deref(), Some(first.id.as_str()));
        assert_eq!(summarizer.latest_for_user("alice").unwrap().id, second.id);
        assert!(summarizer.latest_for_user("bob").is_none());
    }

    #[tokio::test]
    async fn test_restore_keeps_newest_per_user() {
        let source = summarizer();
        let old = source
            .summarize("alice", &chatter(4, Utc::now() - chrono::Duration::days(2)))
            .await
            .unwrap();
        let new = source
            .summarize("alice", &chatter(4, Utc::now()))
            .await
            .unwrap();

        let restored = summarizer();
        restored.restore(vec![new.clone(), old]);
        assert_eq!(restored.latest_for_user("alice").unwrap().id, new.id);
    }
}
