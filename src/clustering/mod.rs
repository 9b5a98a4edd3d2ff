//! Topic clustering
//!
//! Memories are grouped into named topics. New content is assigned
//! incrementally by `classify`; `recluster` periodically rebuilds the whole
//! partition with whichever [`ClusteringStrategy`] scores best.
//!
//! The cluster map and item table share one `RwLock`. Embedding, keyword
//! extraction and naming run before the lock is taken; a rebuild computes the
//! partition on a copy of the points and swaps the result in under a single
//! write lock.

pub mod strategy;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ClusterConfig;
use crate::embedding::{embed_or_none, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::generation::{complete_or_none, parse_string_list, GenerativeTextProvider, PromptMessage};
use crate::similarity::{cosine_similarity, fold_into_mean, mean_vector};
use crate::text::{extract_keywords, jaccard, truncate_chars};

pub use strategy::{
    select_partition, ClusteringStrategy, DensityStrategy, DistanceMatrix, KMeansStrategy, Labels,
    Partition, QualityScorer, SilhouetteScorer,
};

const FALLBACK_TOPIC_NAME: &str = "general";

/// A named group of related memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCluster {
    pub id: Uuid,
    pub name: String,
    pub description: String,

    /// Top keywords by frequency across members
    pub keywords: Vec<String>,
    #[serde(default)]
    pub keyword_counts: HashMap<String, u32>,

    /// Running mean of member embeddings; empty until a member has one
    #[serde(default)]
    pub centroid: Vec<f32>,
    /// Number of members folded into the centroid
    #[serde(default)]
    pub embedded_members: usize,

    pub member_ids: Vec<String>,
    pub member_count: usize,
    pub updated_at: DateTime<Utc>,

    /// Mean assignment score of members, in [0, 1]
    pub confidence: f32,

    #[serde(default)]
    pub related_clusters: Vec<Uuid>,
}

impl TopicCluster {
    fn new(name: String, keywords: &[String], created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: describe(keywords),
            name,
            keywords: Vec::new(),
            keyword_counts: HashMap::new(),
            centroid: Vec::new(),
            embedded_members: 0,
            member_ids: Vec::new(),
            member_count: 0,
            updated_at: created_at,
            confidence: 1.0,
            related_clusters: Vec::new(),
        }
    }

    fn count_keywords(&mut self, keywords: &[String], max_keywords: usize) {
        for keyword in keywords {
            *self.keyword_counts.entry(keyword.clone()).or_insert(0) += 1;
        }
        self.refresh_keywords(max_keywords);
    }

    fn refresh_keywords(&mut self, max_keywords: usize) {
        let mut ranked: Vec<(&String, &u32)> = self.keyword_counts.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        self.keywords = ranked
            .into_iter()
            .take(max_keywords)
            .map(|(k, _)| k.clone())
            .collect();
    }

    fn add_member(&mut self, memory_id: &str) {
        if !self.member_ids.iter().any(|m| m == memory_id) {
            self.member_ids.push(memory_id.to_string());
        }
        self.member_count = self.member_ids.len();
    }
}

fn describe(keywords: &[String]) -> String {
    if keywords.is_empty() {
        "Miscellaneous memories".to_string()
    } else {
        let shown: Vec<&str> = keywords.iter().take(5).map(String::as_str).collect();
        format!("Memories about {}", shown.join(", "))
    }
}

fn keyword_name(keywords: &[String]) -> String {
    if keywords.is_empty() {
        FALLBACK_TOPIC_NAME.to_string()
    } else {
        keywords.iter().take(2).cloned().collect::<Vec<_>>().join(" ")
    }
}

/// Reference to a topic with the score it matched at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRef {
    pub id: Uuid,
    pub name: String,
    pub score: f32,
}

/// Result of classifying one memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub memory_id: String,
    pub primary_topic: TopicRef,
    pub secondary_topics: Vec<TopicRef>,
    pub confidence: f32,
    pub keywords: Vec<String>,

    /// Whether the primary topic was created by this classification
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclusterSkip {
    RecentlyRun,
    TooFewItems,
}

/// Outcome of a rebuild
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReclusterStats {
    pub skipped: Option<ReclusterSkip>,
    pub strategy: Option<String>,
    pub quality: f32,
    pub items: usize,
    pub clusters_before: usize,
    pub clusters_after: usize,
    pub relabeled: usize,
    pub uncategorized: usize,
}

impl ReclusterStats {
    fn skipped(reason: ReclusterSkip, items: usize, clusters: usize) -> Self {
        Self {
            skipped: Some(reason),
            items,
            clusters_before: clusters,
            clusters_after: clusters,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStats {
    pub clusters: usize,
    pub items: usize,
    pub uncategorized: usize,
    pub last_recluster: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct ClusterItem {
    embedding: Option<Vec<f32>>,
    keywords: Vec<String>,
    cluster: Option<Uuid>,
}

#[derive(Default)]
struct ClusterState {
    clusters: HashMap<Uuid, TopicCluster>,
    items: HashMap<String, ClusterItem>,
    last_recluster: Option<DateTime<Utc>>,
}

impl ClusterState {
    /// Take `memory_id` out of its current cluster, re-averaging the centroid
    fn detach(&mut self, memory_id: &str) {
        let Some(cluster_id) = self.items.get(memory_id).and_then(|i| i.cluster) else {
            return;
        };
        let remaining: Vec<String> = match self.clusters.get_mut(&cluster_id) {
            Some(cluster) => {
                cluster.member_ids.retain(|m| m != memory_id);
                cluster.member_count = cluster.member_ids.len();
                cluster.member_ids.clone()
            }
            None => return,
        };

        if remaining.is_empty() {
            self.clusters.remove(&cluster_id);
            for cluster in self.clusters.values_mut() {
                cluster.related_clusters.retain(|r| *r != cluster_id);
            }
            return;
        }

        let embeddings: Vec<&[f32]> = remaining
            .iter()
            .filter_map(|m| self.items.get(m).and_then(|i| i.embedding.as_deref()))
            .collect();
        if let Some(cluster) = self.clusters.get_mut(&cluster_id) {
            cluster.embedded_members = embeddings.len();
            cluster.centroid = mean_vector(embeddings).unwrap_or_default();
        }
    }

    fn member_centroid(&self, member_ids: &[String]) -> (Vec<f32>, usize) {
        let embeddings: Vec<&[f32]> = member_ids
            .iter()
            .filter_map(|m| self.items.get(m).and_then(|i| i.embedding.as_deref()))
            .collect();
        let count = embeddings.len();
        (mean_vector(embeddings).unwrap_or_default(), count)
    }
}

fn link_related(clusters: &mut HashMap<Uuid, TopicCluster>, threshold: f32) {
    let centroids: Vec<(Uuid, Vec<f32>)> = clusters
        .values()
        .map(|c| (c.id, c.centroid.clone()))
        .collect();

    for cluster in clusters.values_mut() {
        cluster.related_clusters = centroids
            .iter()
            .filter(|(id, centroid)| {
                *id != cluster.id
                    && !centroid.is_empty()
                    && cosine_similarity(&cluster.centroid, centroid) > threshold
            })
            .map(|(id, _)| *id)
            .collect();
    }
}

/// Incremental topic classifier with periodic rebuilds
pub struct TopicClusterer {
    config: ClusterConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerativeTextProvider>>,
    timeout: Duration,
    strategies: Vec<Box<dyn ClusteringStrategy>>,
    scorer: Box<dyn QualityScorer>,
    state: RwLock<ClusterState>,
}

impl TopicClusterer {
    pub fn new(
        config: ClusterConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        generator: Option<Arc<dyn GenerativeTextProvider>>,
        timeout: Duration,
    ) -> Self {
        let strategies: Vec<Box<dyn ClusteringStrategy>> = vec![
            Box::new(KMeansStrategy::new(
                config.max_clusters,
                config.kmeans_iterations,
                config.seed,
            )),
            Box::new(DensityStrategy::new(config.min_cluster_size)),
        ];

        Self {
            config,
            embedder,
            generator,
            timeout,
            strategies,
            scorer: Box::new(SilhouetteScorer),
            state: RwLock::new(ClusterState::default()),
        }
    }

    /// Replace the rebuild strategies and the metric used to choose between them
    pub fn with_strategies(
        mut self,
        strategies: Vec<Box<dyn ClusteringStrategy>>,
        scorer: Box<dyn QualityScorer>,
    ) -> Self {
        self.strategies = strategies;
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Assign `content` to a topic, creating one if nothing matches well
    pub async fn classify(&self, memory_id: &str, content: &str) -> TopicAssignment {
        let embedding = embed_or_none(self.embedder.as_deref(), content, self.timeout).await;
        self.classify_with_embedding(memory_id, content, embedding).await
    }

    /// Same as [`classify`](Self::classify) with an embedding computed elsewhere
    pub async fn classify_with_embedding(
        &self,
        memory_id: &str,
        content: &str,
        embedding: Option<Vec<f32>>,
    ) -> TopicAssignment {
        let keywords = self.extract_keywords(content).await;

        let (scored, cluster_count) = {
            let state = self.state.read();
            let mut scored: Vec<TopicRef> = state
                .clusters
                .values()
                .filter(|c| !c.member_ids.iter().any(|m| m == memory_id) || c.member_count > 1)
                .map(|c| TopicRef {
                    id: c.id,
                    name: c.name.clone(),
                    score: self.match_score(c, embedding.as_deref(), &keywords),
                })
                .collect();
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            (scored, state.clusters.len())
        };

        let best = scored.first().cloned();
        let weak = best
            .as_ref()
            .map_or(true, |b| b.score < self.config.auto_cluster_threshold);
        let create = weak && cluster_count < self.config.max_clusters;

        let name = if create {
            Some(self.name_topic(&keywords, content).await)
        } else {
            None
        };

        let now = Utc::now();
        let mut state = self.state.write();
        state.detach(memory_id);

        let target = match (&name, &best) {
            (None, Some(best)) if state.clusters.contains_key(&best.id) => Some(best.clone()),
            _ => None,
        };

        let assigned = target.and_then(|best| {
            let cluster = state.clusters.get_mut(&best.id)?;
            if let Some(e) = embedding.as_deref() {
                fold_into_mean(&mut cluster.centroid, e, cluster.embedded_members);
                cluster.embedded_members += 1;
            }
            cluster.add_member(memory_id);
            cluster.count_keywords(&keywords, self.config.max_keywords);
            cluster.confidence += (best.score - cluster.confidence) / cluster.member_count as f32;
            cluster.confidence = cluster.confidence.clamp(0.0, 1.0);
            cluster.updated_at = now;
            tracing::debug!(
                "Assigned memory {} to topic '{}' (score {:.3})",
                memory_id,
                cluster.name,
                best.score
            );
            let confidence = best.score.clamp(0.0, 1.0);
            Some((best, confidence, false))
        });

        let (primary, confidence, created) = match assigned {
            Some(assigned) => assigned,
            None => {
                let name = name.unwrap_or_else(|| keyword_name(&keywords));
                let mut cluster = TopicCluster::new(name, &keywords, now);
                if let Some(e) = embedding.as_deref() {
                    cluster.centroid = e.to_vec();
                    cluster.embedded_members = 1;
                }
                cluster.add_member(memory_id);
                cluster.count_keywords(&keywords, self.config.max_keywords);

                tracing::info!(
                    "Created topic '{}' ({}) for memory {}",
                    cluster.name,
                    cluster.id,
                    memory_id
                );
                let primary = TopicRef {
                    id: cluster.id,
                    name: cluster.name.clone(),
                    score: 1.0,
                };
                state.clusters.insert(cluster.id, cluster);
                (primary, 1.0, true)
            }
        };

        state.items.insert(
            memory_id.to_string(),
            ClusterItem {
                embedding,
                keywords: keywords.clone(),
                cluster: Some(primary.id),
            },
        );

        let secondary_topics = scored
            .into_iter()
            .filter(|t| t.id != primary.id && t.score > self.config.secondary_threshold)
            .filter(|t| state.clusters.contains_key(&t.id))
            .collect();

        TopicAssignment {
            memory_id: memory_id.to_string(),
            primary_topic: primary,
            secondary_topics,
            confidence,
            keywords,
            created,
        }
    }

    /// Weighted centroid/keyword match, keyword-only when either side lacks an embedding
    fn match_score(
        &self,
        cluster: &TopicCluster,
        embedding: Option<&[f32]>,
        keywords: &[String],
    ) -> f32 {
        let keyword_score = jaccard(keywords, &cluster.keywords);
        match embedding {
            Some(e) if !cluster.centroid.is_empty() => {
                let centroid_score = cosine_similarity(e, &cluster.centroid).max(0.0);
                self.config.centroid_weight * centroid_score
                    + self.config.keyword_weight * keyword_score
            }
            _ => keyword_score,
        }
    }

    async fn extract_keywords(&self, content: &str) -> Vec<String> {
        let limit = self.config.max_keywords;
        let messages = [
            PromptMessage::system(format!(
                "Extract up to {limit} keywords describing the topic of the text. \
                 Reply with a JSON array of lowercase strings and nothing else."
            )),
            PromptMessage::user(content),
        ];

        let response =
            complete_or_none(self.generator.as_deref(), &messages, 100, 0.2, self.timeout).await;
        match response.as_deref().and_then(parse_string_list) {
            Some(mut keywords) => {
                keywords.truncate(limit);
                keywords
            }
            None => extract_keywords(content, limit),
        }
    }

    async fn name_topic(&self, keywords: &[String], content: &str) -> String {
        let messages = [
            PromptMessage::system(
                "Name the topic of a group of memories in one to three words. \
                 Reply with a JSON array holding the name and nothing else.",
            ),
            PromptMessage::user(format!(
                "Keywords: {}\nExample: {}",
                keywords.join(", "),
                truncate_chars(content, 200)
            )),
        ];

        let response =
            complete_or_none(self.generator.as_deref(), &messages, 20, 0.3, self.timeout).await;
        response
            .as_deref()
            .and_then(parse_string_list)
            .and_then(|names| names.into_iter().next())
            .unwrap_or_else(|| keyword_name(keywords))
    }

    /// Rebuild every topic from the stored embeddings
    pub fn recluster(&self, force: bool) -> ReclusterStats {
        let now = Utc::now();
        let interval = chrono::Duration::seconds(self.config.recluster_interval_secs as i64);

        let (ids, points, clusters_before) = {
            let state = self.state.read();
            let clusters_before = state.clusters.len();
            if !force {
                if let Some(last) = state.last_recluster {
                    if now - last < interval {
                        tracing::debug!("Skipping recluster, last run at {}", last);
                        return ReclusterStats::skipped(
                            ReclusterSkip::RecentlyRun,
                            state.items.len(),
                            clusters_before,
                        );
                    }
                }
            }

            let mut ids = Vec::new();
            let mut points = Vec::new();
            for (id, item) in &state.items {
                if let Some(e) = &item.embedding {
                    ids.push(id.clone());
                    points.push(e.clone());
                }
            }
            (ids, points, clusters_before)
        };

        if points.len() < self.config.recluster_min_items {
            tracing::debug!(
                "Skipping recluster, {} embedded items below minimum {}",
                points.len(),
                self.config.recluster_min_items
            );
            let skip = ReclusterSkip::TooFewItems;
            return ReclusterStats::skipped(skip, points.len(), clusters_before);
        }

        let scorer = self.scorer.as_ref();
        let Some(partition) = select_partition(&self.strategies, scorer, &points) else {
            tracing::warn!("No clustering strategy configured, keeping existing topics");
            let skip = ReclusterSkip::TooFewItems;
            return ReclusterStats::skipped(skip, points.len(), clusters_before);
        };

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, label) in partition.labels.iter().enumerate() {
            if let Some(label) = label {
                groups.entry(*label).or_default().push(i);
            }
        }
        let mut groups: Vec<Vec<usize>> = groups
            .into_values()
            .filter(|g| g.len() >= self.config.min_cluster_size)
            .collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
        groups.truncate(self.config.max_clusters);

        let mut state = self.state.write();
        let mut rebuilt: HashMap<Uuid, TopicCluster> = HashMap::new();
        let mut new_labels: HashMap<String, Uuid> = HashMap::new();
        let mut reused: HashSet<Uuid> = HashSet::new();

        for group in &groups {
            let member_ids: Vec<String> = group.iter().map(|&i| ids[i].clone()).collect();

            let mut previous: HashMap<Uuid, usize> = HashMap::new();
            for m in &member_ids {
                if let Some(old) = state.items.get(m).and_then(|i| i.cluster) {
                    *previous.entry(old).or_insert(0) += 1;
                }
            }
            let inherited = previous
                .into_iter()
                .filter(|(id, count)| count * 2 > member_ids.len() && !reused.contains(id))
                .max_by_key(|(_, count)| *count)
                .and_then(|(id, _)| state.clusters.get(&id));

            let mut keyword_counts: HashMap<String, u32> = HashMap::new();
            for m in &member_ids {
                if let Some(item) = state.items.get(m) {
                    for k in &item.keywords {
                        *keyword_counts.entry(k.clone()).or_insert(0) += 1;
                    }
                }
            }

            let centroid =
                mean_vector(group.iter().map(|&i| points[i].as_slice())).unwrap_or_default();
            let cohesion = group
                .iter()
                .map(|&i| cosine_similarity(&points[i], &centroid))
                .sum::<f32>()
                / group.len() as f32;

            let mut cluster = TopicCluster::new(String::new(), &[], now);
            cluster.keyword_counts = keyword_counts;
            cluster.refresh_keywords(self.config.max_keywords);
            match inherited {
                Some(old) => {
                    cluster.id = old.id;
                    cluster.name = old.name.clone();
                    cluster.description = old.description.clone();
                    reused.insert(old.id);
                }
                None => {
                    cluster.name = keyword_name(&cluster.keywords);
                    cluster.description = describe(&cluster.keywords);
                }
            }
            cluster.centroid = centroid;
            cluster.embedded_members = group.len();
            cluster.confidence = cohesion.clamp(0.0, 1.0);
            for m in &member_ids {
                new_labels.insert(m.clone(), cluster.id);
                cluster.add_member(m);
            }
            rebuilt.insert(cluster.id, cluster);
        }

        // Items that were not part of the partition keep a surviving topic
        let partitioned: HashSet<&String> = ids.iter().collect();
        let mut relabeled = 0;
        let mut uncategorized = 0;
        for (memory_id, item) in state.items.iter_mut() {
            let label = if partitioned.contains(memory_id) {
                new_labels.get(memory_id).copied()
            } else {
                item.cluster.filter(|c| rebuilt.contains_key(c))
            };
            if let (false, Some(c)) = (partitioned.contains(memory_id), label) {
                if let Some(cluster) = rebuilt.get_mut(&c) {
                    cluster.add_member(memory_id);
                }
            }
            if label != item.cluster {
                relabeled += 1;
            }
            if label.is_none() {
                uncategorized += 1;
            }
            item.cluster = label;
        }

        link_related(&mut rebuilt, self.config.related_threshold);
        let clusters_after = rebuilt.len();
        state.clusters = rebuilt;
        state.last_recluster = Some(now);

        tracing::info!(
            "Reclustered {} items with {} (quality {:.3}): {} -> {} topics, {} uncategorized",
            points.len(),
            partition.strategy,
            partition.quality,
            clusters_before,
            clusters_after,
            uncategorized
        );

        ReclusterStats {
            skipped: None,
            strategy: Some(partition.strategy.to_string()),
            quality: partition.quality,
            items: state.items.len(),
            clusters_before,
            clusters_after,
            relabeled,
            uncategorized,
        }
    }

    /// Fold `id_b` into `id_a`
    pub fn merge_clusters(&self, id_a: Uuid, id_b: Uuid) -> Result<TopicCluster> {
        if id_a == id_b {
            return Err(Error::invalid_input(format!("cannot merge topic {id_a} with itself")));
        }

        let mut state = self.state.write();
        if !state.clusters.contains_key(&id_a) {
            return Err(Error::not_found(format!("topic {id_a}")));
        }
        let absorbed = state
            .clusters
            .remove(&id_b)
            .ok_or_else(|| Error::not_found(format!("topic {id_b}")))?;

        for item in state.items.values_mut() {
            if item.cluster == Some(id_b) {
                item.cluster = Some(id_a);
            }
        }
        for cluster in state.clusters.values_mut() {
            if cluster.related_clusters.contains(&id_b) {
                cluster.related_clusters.retain(|r| *r != id_b);
                if cluster.id != id_a && !cluster.related_clusters.contains(&id_a) {
                    cluster.related_clusters.push(id_a);
                }
            }
        }

        let mut merged = state
            .clusters
            .remove(&id_a)
            .ok_or_else(|| Error::not_found(format!("topic {id_a}")))?;
        let kept_members = merged.member_count as f32;

        for m in &absorbed.member_ids {
            merged.add_member(m);
        }
        for (keyword, count) in absorbed.keyword_counts {
            *merged.keyword_counts.entry(keyword).or_insert(0) += count;
        }
        merged.refresh_keywords(self.config.max_keywords);
        for related in absorbed.related_clusters {
            if related != id_a && !merged.related_clusters.contains(&related) {
                merged.related_clusters.push(related);
            }
        }
        merged.related_clusters.retain(|r| *r != id_a && *r != id_b);

        let (centroid, embedded) = state.member_centroid(&merged.member_ids);
        merged.centroid = centroid;
        merged.embedded_members = embedded;

        let total = kept_members + absorbed.member_count as f32;
        if total > 0.0 {
            merged.confidence = (merged.confidence * kept_members
                + absorbed.confidence * absorbed.member_count as f32)
                / total;
        }
        merged.updated_at = Utc::now();

        tracing::info!(
            "Merged topic '{}' into '{}' ({} members)",
            absorbed.name,
            merged.name,
            merged.member_count
        );

        state.clusters.insert(id_a, merged.clone());
        Ok(merged)
    }

    /// Drop a memory from its topic; empty topics disappear
    pub fn forget(&self, memory_id: &str) -> bool {
        let mut state = self.state.write();
        state.detach(memory_id);
        state.items.remove(memory_id).is_some()
    }

    /// All topics, largest first
    pub fn clusters(&self) -> Vec<TopicCluster> {
        let mut clusters: Vec<TopicCluster> =
            self.state.read().clusters.values().cloned().collect();
        clusters.sort_by(|a, b| {
            b.member_count
                .cmp(&a.member_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        clusters
    }

    pub fn cluster(&self, id: Uuid) -> Option<TopicCluster> {
        self.state.read().clusters.get(&id).cloned()
    }

    pub fn cluster_of(&self, memory_id: &str) -> Option<Uuid> {
        self.state.read().items.get(memory_id).and_then(|i| i.cluster)
    }

    /// Replace all state with previously saved topics
    ///
    /// Members regain their embeddings from `embeddings` when available.
    pub fn restore(&self, clusters: Vec<TopicCluster>, embeddings: &HashMap<String, Vec<f32>>) {
        let mut state = ClusterState::default();
        for cluster in clusters {
            for m in &cluster.member_ids {
                state.items.insert(
                    m.clone(),
                    ClusterItem {
                        embedding: embeddings.get(m).cloned(),
                        keywords: cluster.keywords.clone(),
                        cluster: Some(cluster.id),
                    },
                );
            }
            state.clusters.insert(cluster.id, cluster);
        }
        tracing::info!(
            "Restored {} topics covering {} memories",
            state.clusters.len(),
            state.items.len()
        );
        *self.state.write() = state;
    }

    pub fn stats(&self) -> ClusterStats {
        let state = self.state.read();
        ClusterStats {
            clusters: state.clusters.len(),
            items: state.items.len(),
            uncategorized: state.items.values().filter(|i| i.cluster.is_none()).count(),
            last_recluster: state.last_recluster,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingGenerator, HashingEmbedder, ScriptedGenerator};

    fn clusterer() -> TopicClusterer {
        TopicClusterer::new(
            ClusterConfig::default(),
            Some(Arc::new(HashingEmbedder::default())),
            None,
            Duration::from_secs(1),
        )
    }

    const HIKING: [&str; 6] = [
        "hiking trail mountain summit boots",
        "hiking trail mountain summit ridge",
        "hiking trail mountain summit map",
        "hiking trail mountain summit sunrise",
        "hiking trail mountain summit backpack",
        "hiking trail mountain summit compass",
    ];

    const COOKING: [&str; 6] = [
        "pasta tomato garlic basil oven",
        "pasta tomato garlic basil sauce",
        "pasta tomato garlic basil cheese",
        "pasta tomato garlic basil olive",
        "pasta tomato garlic basil noodles",
        "pasta tomato garlic basil dinner",
    ];

    #[tokio::test]
    async fn test_similar_content_converges_on_one_topic() {
        let clusterer = clusterer();
        let first = clusterer.classify("m1", HIKING[0]).await;
        let second = clusterer.classify("m2", HIKING[1]).await;
        let third = clusterer.classify("m3", HIKING[2]).await;

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.primary_topic.id, second.primary_topic.id);
        assert_eq!(first.primary_topic.id, third.primary_topic.id);

        let topic = clusterer.cluster(first.primary_topic.id).unwrap();
        assert_eq!(topic.member_count, 3);
        assert!(topic.keywords.contains(&"hiking".to_string()));
    }

    #[tokio::test]
    async fn test_unrelated_content_creates_new_topic() {
        let clusterer = clusterer();
        let hiking = clusterer.classify("m1", HIKING[0]).await;
        let cooking = clusterer.classify("m2", COOKING[0]).await;

        assert!(cooking.created);
        assert_ne!(hiking.primary_topic.id, cooking.primary_topic.id);
        assert_eq!(clusterer.stats().clusters, 2);
    }

    #[tokio::test]
    async fn test_centroid_is_running_mean_of_members() {
        let clusterer = clusterer();
        for (i, text) in HIKING.iter().take(3).enumerate() {
            clusterer.classify(&format!("m{i}"), text).await;
        }
        let topic = clusterer.clusters().remove(0);

        let vectors: Vec<Vec<f32>> =
            HIKING.iter().take(3).map(|t| HashingEmbedder::vector(t)).collect();
        let expected = mean_vector(vectors.iter().map(|v| v.as_slice())).unwrap();
        assert_eq!(topic.embedded_members, 3);
        for (a, b) in topic.centroid.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_secondary_topics_reported() {
        let clusterer = clusterer();
        clusterer.classify("m1", "hiking trail mountain").await;
        clusterer.classify("m2", "pasta tomato garlic").await;
        let both = clusterer
            .classify("m3", "hiking trail mountain pasta tomato garlic")
            .await;

        assert!(!both.created);
        assert_eq!(both.secondary_topics.len(), 1);
        assert!(both.secondary_topics[0].score > 0.5);
        assert_ne!(both.secondary_topics[0].id, both.primary_topic.id);
    }

    #[tokio::test]
    async fn test_generated_keywords_and_name_are_used() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            r#"["trail running", "endurance"]"#.to_string(),
            "```json\n[\"Trail Running\"]\n```".to_string(),
        ]));
        let clusterer = TopicClusterer::new(
            ClusterConfig::default(),
            Some(Arc::new(HashingEmbedder::default())),
            Some(generator.clone()),
            Duration::from_secs(1),
        );

        let assignment = clusterer.classify("m1", "Ran twenty miles on the ridge today").await;
        assert_eq!(assignment.keywords, vec!["trail running", "endurance"]);
        assert_eq!(assignment.primary_topic.name, "trail running");
        assert_eq!(generator.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back_to_frequency_keywords() {
        let clusterer = TopicClusterer::new(
            ClusterConfig::default(),
            Some(Arc::new(HashingEmbedder::default())),
            Some(Arc::new(FailingGenerator)),
            Duration::from_secs(1),
        );

        let assignment = clusterer
            .classify("m1", "Garden tomatoes need water, tomatoes love sun")
            .await;
        assert_eq!(assignment.keywords[0], "tomatoes");
        assert_eq!(assignment.primary_topic.name, keyword_name(&assignment.keywords));
    }

    #[tokio::test]
    async fn test_cluster_cap_forces_best_match() {
        let config = ClusterConfig {
            max_clusters: 1,
            ..Default::default()
        };
        let clusterer = TopicClusterer::new(
            config,
            Some(Arc::new(HashingEmbedder::default())),
            None,
            Duration::from_secs(1),
        );

        let first = clusterer.classify("m1", HIKING[0]).await;
        let second = clusterer.classify("m2", COOKING[0]).await;
        assert!(!second.created);
        assert_eq!(first.primary_topic.id, second.primary_topic.id);
    }

    #[tokio::test]
    async fn test_merge_clusters() {
        let clusterer = clusterer();
        let a = clusterer.classify("m1", HIKING[0]).await.primary_topic.id;
        clusterer.classify("m2", HIKING[1]).await;
        let b = clusterer.classify("m3", COOKING[0]).await.primary_topic.id;
        assert_ne!(a, b);

        let merged = clusterer.merge_clusters(a, b).unwrap();
        assert_eq!(merged.member_count, 3);
        assert_eq!(merged.embedded_members, 3);
        assert!(merged.keywords.contains(&"pasta".to_string()));
        assert!(clusterer.cluster(b).is_none());
        assert_eq!(clusterer.cluster_of("m3"), Some(a));

        let texts = [HIKING[0], HIKING[1], COOKING[0]];
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| HashingEmbedder::vector(t)).collect();
        let expected = mean_vector(vectors.iter().map(|v| v.as_slice())).unwrap();
        for (x, y) in merged.centroid.iter().zip(&expected) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_merge_rejects_bad_ids() {
        let clusterer = clusterer();
        let a = clusterer.classify("m1", HIKING[0]).await.primary_topic.id;

        assert!(matches!(clusterer.merge_clusters(a, a), Err(Error::InvalidInput(_))));
        assert!(matches!(
            clusterer.merge_clusters(a, Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            clusterer.merge_clusters(Uuid::new_v4(), a),
            Err(Error::NotFound(_))
        ));
        assert!(clusterer.cluster(a).is_some());
    }

    #[tokio::test]
    async fn test_recluster_skips_small_collections() {
        let clusterer = clusterer();
        for (i, text) in HIKING.iter().enumerate() {
            clusterer.classify(&format!("h{i}"), text).await;
        }
        let stats = clusterer.recluster(true);
        assert_eq!(stats.skipped, Some(ReclusterSkip::TooFewItems));
        assert!(clusterer.stats().last_recluster.is_none());
    }

    #[tokio::test]
    async fn test_recluster_rebuilds_topics() {
        let clusterer = clusterer();
        for (i, text) in HIKING.iter().enumerate() {
            clusterer.classify(&format!("h{i}"), text).await;
        }
        for (i, text) in COOKING.iter().enumerate() {
            clusterer.classify(&format!("c{i}"), text).await;
        }
        let before = clusterer.cluster_of("h0").unwrap();

        let stats = clusterer.recluster(true);
        assert!(stats.skipped.is_none());
        assert_eq!(stats.clusters_after, 2);
        assert_eq!(stats.uncategorized, 0);

        let hiking = clusterer.cluster_of("h0").unwrap();
        let cooking = clusterer.cluster_of("c0").unwrap();
        assert_ne!(hiking, cooking);
        assert!((1..6).all(|i| clusterer.cluster_of(&format!("h{i}")) == Some(hiking)));
        assert!((1..6).all(|i| clusterer.cluster_of(&format!("c{i}")) == Some(cooking)));

        // The hiking topic survives the rebuild under its old identity
        assert_eq!(hiking, before);

        let again = clusterer.recluster(false);
        assert_eq!(again.skipped, Some(ReclusterSkip::RecentlyRun));
    }

    /// Labels each point by its largest coordinate
    struct ArgmaxStrategy;

    impl ClusteringStrategy for ArgmaxStrategy {
        fn name(&self) -> &'static str {
            "argmax"
        }

        fn partition(&self, points: &[Vec<f32>], _distances: &DistanceMatrix) -> Labels {
            points
                .iter()
                .map(|p| {
                    p.iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(i, _)| i)
                })
                .collect()
        }
    }

    /// Puts every point in one cluster
    struct LumpStrategy;

    impl ClusteringStrategy for LumpStrategy {
        fn name(&self) -> &'static str {
            "lump"
        }

        fn partition(&self, points: &[Vec<f32>], _distances: &DistanceMatrix) -> Labels {
            vec![Some(0); points.len()]
        }
    }

    /// Rates a partition by how few clusters it has
    struct FewestClusters;

    impl QualityScorer for FewestClusters {
        fn score(&self, _distances: &DistanceMatrix, labels: &Labels) -> f32 {
            let distinct: HashSet<usize> = labels.iter().flatten().copied().collect();
            1.0 / distinct.len().max(1) as f32
        }
    }

    fn argmax_clusterer() -> TopicClusterer {
        TopicClusterer::new(ClusterConfig::default(), None, None, Duration::from_secs(1))
            .with_strategies(vec![Box::new(ArgmaxStrategy)], Box::new(SilhouetteScorer))
    }

    /// Two neighboring groups along the first two axes plus `outliers` on the third
    async fn seed_groups(clusterer: &TopicClusterer, outliers: usize) {
        for i in 0..6 {
            let drift = 0.01 * i as f32;
            let hiking = vec![1.0, 0.7 + drift, 0.0];
            let cooking = vec![0.7 + drift, 1.0, 0.0];
            clusterer
                .classify_with_embedding(&format!("h{i}"), HIKING[i], Some(hiking))
                .await;
            clusterer
                .classify_with_embedding(&format!("c{i}"), COOKING[i], Some(cooking))
                .await;
        }
        for i in 0..outliers {
            let drift = 0.01 * i as f32;
            clusterer
                .classify_with_embedding(
                    &format!("o{i}"),
                    "quarterly tax filing deadline",
                    Some(vec![0.0, drift, 1.0]),
                )
                .await;
        }
    }

    #[tokio::test]
    async fn test_recluster_links_neighboring_topics() {
        let clusterer = argmax_clusterer();
        seed_groups(&clusterer, 3).await;

        let stats = clusterer.recluster(true);
        assert_eq!(stats.strategy.as_deref(), Some("argmax"));
        assert_eq!(stats.clusters_after, 3);

        let hiking = clusterer.cluster(clusterer.cluster_of("h0").unwrap()).unwrap();
        let cooking = clusterer.cluster(clusterer.cluster_of("c0").unwrap()).unwrap();
        let taxes = clusterer.cluster(clusterer.cluster_of("o0").unwrap()).unwrap();

        assert!(cosine_similarity(&hiking.centroid, &cooking.centroid) > 0.6);
        assert_eq!(hiking.related_clusters, vec![cooking.id]);
        assert_eq!(cooking.related_clusters, vec![hiking.id]);
        assert!(taxes.related_clusters.is_empty());
    }

    #[tokio::test]
    async fn test_recluster_discards_undersized_groups() {
        let clusterer = argmax_clusterer();
        seed_groups(&clusterer, 1).await;

        let stats = clusterer.recluster(true);
        assert_eq!(stats.clusters_after, 2);
        assert_eq!(stats.uncategorized, 1);
        assert_eq!(clusterer.cluster_of("o0"), None);
        assert!(clusterer.cluster_of("h0").is_some());
        assert!(clusterer
            .clusters()
            .iter()
            .all(|c| !c.member_ids.contains(&"o0".to_string())));
    }

    #[tokio::test]
    async fn test_injected_scorer_chooses_between_injected_strategies() {
        let clusterer =
            TopicClusterer::new(ClusterConfig::default(), None, None, Duration::from_secs(1))
                .with_strategies(
                    vec![Box::new(ArgmaxStrategy), Box::new(LumpStrategy)],
                    Box::new(FewestClusters),
                );
        seed_groups(&clusterer, 0).await;

        let stats = clusterer.recluster(true);
        assert_eq!(stats.strategy.as_deref(), Some("lump"));
        assert_eq!(stats.quality, 1.0);
        assert_eq!(stats.clusters_after, 1);
        assert_eq!(clusterer.cluster_of("h0"), clusterer.cluster_of("c5"));
    }

    #[tokio::test]
    async fn test_forget_removes_member_and_empty_topics() {
        let clusterer = clusterer();
        let topic = clusterer.classify("m1", HIKING[0]).await.primary_topic.id;
        clusterer.classify("m2", HIKING[1]).await;

        assert!(clusterer.forget("m2"));
        let remaining = clusterer.cluster(topic).unwrap();
        assert_eq!(remaining.member_ids, vec!["m1"]);
        assert_eq!(remaining.centroid, HashingEmbedder::vector(HIKING[0]));

        assert!(clusterer.forget("m1"));
        assert!(clusterer.cluster(topic).is_none());
        assert!(!clusterer.forget("m1"));
    }

    #[tokio::test]
    async fn test_restore_replaces_state() {
        let clusterer = clusterer();
        let a = clusterer.classify("m1", HIKING[0]).await.primary_topic.id;
        let saved = clusterer.clusters();

        let fresh = self::clusterer();
        let mut embeddings = HashMap::new();
        embeddings.insert("m1".to_string(), HashingEmbedder::vector(HIKING[0]));
        fresh.restore(saved, &embeddings);

        assert_eq!(fresh.cluster_of("m1"), Some(a));
        let next = fresh.classify("m2", HIKING[1]).await;
        assert_eq!(next.primary_topic.id, a);
    }
}
