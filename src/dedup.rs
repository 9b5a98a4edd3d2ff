//! Duplicate detection and storage-optimization hints
//!
//! The deduplicator decides whether new content is distinct enough to be
//! admitted as memory. Every registered memory gets an immutable
//! [`MemoryFingerprint`]; admission checks run the cheap exact-hash test first,
//! then an embedding-preview filter, and only then a full cosine comparison.
//!
//! # Concurrency
//!
//! The fingerprint index lives behind a single `RwLock`. Embeddings are
//! computed before the lock is taken and the lock is never held across an
//! `.await`: `should_store` and `optimize_storage` take it shared, `register`,
//! `remove` and `restore` take it exclusively.
//!
//! # Capacity
//!
//! Expired and over-capacity fingerprints are purged after each registration,
//! not in the background. The store can therefore exceed `max_fingerprints`
//! by at most the number of registrations currently in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::config::DedupConfig;
use crate::embedding::{embed_or_none, EmbeddingProvider};
use crate::memory::MemoryType;
use crate::similarity::{cosine_similarity, fold_into_mean, mean_vector};
use crate::text::{extract_keywords, jaccard, normalize};

/// How long an embedding computed by `should_store` is kept for `register`
const PENDING_EMBEDDING_TTL: Duration = Duration::from_secs(120);
const PENDING_EMBEDDING_CAPACITY: usize = 256;

/// Compact, comparison-friendly signature of a piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFingerprint {
    /// SHA-256 of the whitespace-normalized, lowercased content
    pub content_hash: String,

    /// SHA-256 of the sorted key phrases, independent of their order in the text
    pub semantic_hash: String,

    /// Leading slice of the full embedding; empty when no embedding was available
    pub embedding_preview: Vec<f32>,

    pub content_length: usize,

    /// Key phrases ranked by frequency
    pub key_phrases: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub memory_type: MemoryType,
}

impl MemoryFingerprint {
    pub fn compute(
        content: &str,
        memory_type: MemoryType,
        embedding: Option<&[f32]>,
        config: &DedupConfig,
    ) -> Self {
        let key_phrases = extract_keywords(content, config.key_phrase_limit);
        let embedding_preview = embedding
            .map(|e| e[..e.len().min(config.preview_dims)].to_vec())
            .unwrap_or_default();

        Self {
            content_hash: content_hash(content),
            semantic_hash: semantic_hash(&key_phrases),
            embedding_preview,
            content_length: content.trim().chars().count(),
            key_phrases,
            created_at: Utc::now(),
            memory_type,
        }
    }

    /// Whether two fingerprints carry the same hashes and key phrases
    pub fn same_signature(&self, other: &MemoryFingerprint) -> bool {
        self.content_hash == other.content_hash
            && self.semantic_hash == other.semantic_hash
            && self.key_phrases == other.key_phrases
            && self.content_length == other.content_length
    }
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(content).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn semantic_hash(key_phrases: &[String]) -> String {
    let mut sorted: Vec<&str> = key_phrases.iter().map(|s| s.as_str()).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(sorted.join("|").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Why content was admitted or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    Distinct,
    ExactDuplicate,
    NearDuplicate,
    /// Below the minimum content length; nothing was compared
    TooShort,
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub admit: bool,

    /// Closest stored memory, if any was compared
    pub similar_memory_id: Option<String>,

    /// Similarity to `similar_memory_id` (0.0 when nothing was compared)
    pub similarity: f32,

    pub reason: AdmissionReason,
}

impl AdmissionDecision {
    fn admitted(closest: Option<(String, f32)>) -> Self {
        let (similar_memory_id, similarity) = match closest {
            Some((id, sim)) => (Some(id), sim),
            None => (None, 0.0),
        };
        Self {
            admit: true,
            similar_memory_id,
            similarity,
            reason: AdmissionReason::Distinct,
        }
    }

    fn rejected(memory_id: String, similarity: f32, reason: AdmissionReason) -> Self {
        Self {
            admit: false,
            similar_memory_id: Some(memory_id),
            similarity,
            reason,
        }
    }

    fn too_short() -> Self {
        Self {
            admit: false,
            similar_memory_id: None,
            similarity: 0.0,
            reason: AdmissionReason::TooShort,
        }
    }
}

/// A group of stored memories that are close enough to be merged later
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageCluster {
    pub id: Uuid,
    pub representative: String,
    pub members: Vec<String>,

    /// Running mean of member embeddings
    pub centroid: Vec<f32>,
    pub embedded_members: usize,

    /// Key phrases of the representative, used when embeddings are missing
    pub keywords: Vec<String>,
}

/// A fingerprint together with the full embedding it was built from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub memory_id: String,
    pub fingerprint: MemoryFingerprint,
    pub embedding: Option<Vec<f32>>,
}

/// Result of [`Deduplicator::register`]
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub storage_cluster: Uuid,
    pub purged: Vec<String>,
}

/// Near-duplicate group found by `optimize_storage`
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    /// Member kept if the group were collapsed (the longest content)
    pub representative: String,
    pub members: Vec<String>,
    pub mean_similarity: f32,
}

/// Redundancy estimate over a set of stored memories
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationReport {
    pub examined: usize,
    pub unknown_ids: Vec<String>,
    pub groups: Vec<DuplicateGroup>,

    /// Memories that could be dropped in favor of their group representative
    pub redundant_count: usize,

    /// Characters those redundant memories occupy
    pub reclaimable_chars: usize,

    /// `redundant_count / examined`
    pub redundancy_ratio: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupStats {
    pub fingerprints: usize,
    pub clusters: usize,
    pub largest_cluster: usize,
}

#[derive(Default)]
struct DedupIndex {
    records: HashMap<String, FingerprintRecord>,
    by_content_hash: HashMap<String, String>,
    clusters: HashMap<Uuid, StorageCluster>,
    membership: HashMap<String, Uuid>,
}

impl DedupIndex {
    /// Similarity between a new fingerprint and a stored record
    ///
    /// Returns `None` when the preview filter rules the pair out.
    fn compare(
        fingerprint: &MemoryFingerprint,
        embedding: Option<&[f32]>,
        stored: &FingerprintRecord,
        config: &DedupConfig,
    ) -> Option<f32> {
        match (embedding, stored.embedding.as_deref()) {
            (Some(new), Some(old)) => {
                let preview = preview_similarity(
                    &fingerprint.embedding_preview,
                    &stored.fingerprint.embedding_preview,
                );
                if preview < config.similarity_threshold - config.preview_margin {
                    return None;
                }
                Some(cosine_similarity(new, old))
            }
            _ => Some(jaccard(&fingerprint.key_phrases, &stored.fingerprint.key_phrases)),
        }
    }

    fn closest(
        &self,
        fingerprint: &MemoryFingerprint,
        embedding: Option<&[f32]>,
        config: &DedupConfig,
    ) -> Option<(String, f32)> {
        self.records
            .values()
            .filter_map(|stored| {
                Self::compare(fingerprint, embedding, stored, config)
                    .map(|sim| (stored.memory_id.clone(), sim))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
    }

    fn insert(&mut self, record: FingerprintRecord, config: &DedupConfig) -> Uuid {
        if self.records.contains_key(&record.memory_id) {
            self.remove(&record.memory_id);
        }

        let memory_id = record.memory_id.clone();
        self.by_content_hash
            .entry(record.fingerprint.content_hash.clone())
            .or_insert_with(|| memory_id.clone());

        let cluster_id = self.assign_cluster(&record, config);
        self.membership.insert(memory_id.clone(), cluster_id);
        self.records.insert(memory_id, record);
        cluster_id
    }

    fn assign_cluster(&mut self, record: &FingerprintRecord, config: &DedupConfig) -> Uuid {
        let embedding = record.embedding.as_deref();
        let best = self
            .clusters
            .values()
            .map(|cluster| {
                let sim = match embedding {
                    Some(e) if !cluster.centroid.is_empty() => {
                        cosine_similarity(e, &cluster.centroid)
                    }
                    _ => jaccard(&record.fingerprint.key_phrases, &cluster.keywords),
                };
                (cluster.id, sim)
            })
            .filter(|(_, sim)| *sim >= config.merge_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((cluster_id, _)) = best {
            if let Some(cluster) = self.clusters.get_mut(&cluster_id) {
                cluster.members.push(record.memory_id.clone());
                if let Some(e) = embedding {
                    fold_into_mean(&mut cluster.centroid, e, cluster.embedded_members);
                    cluster.embedded_members += 1;
                }
                return cluster_id;
            }
        }

        let cluster = StorageCluster {
            id: Uuid::new_v4(),
            representative: record.memory_id.clone(),
            members: vec![record.memory_id.clone()],
            centroid: embedding.map(|e| e.to_vec()).unwrap_or_default(),
            embedded_members: usize::from(embedding.is_some()),
            keywords: record.fingerprint.key_phrases.clone(),
        };
        let id = cluster.id;
        self.clusters.insert(id, cluster);
        id
    }

    fn remove(&mut self, memory_id: &str) -> Option<FingerprintRecord> {
        let record = self.records.remove(memory_id)?;

        if self
            .by_content_hash
            .get(&record.fingerprint.content_hash)
            .is_some_and(|owner| owner == memory_id)
        {
            self.by_content_hash.remove(&record.fingerprint.content_hash);
            // Another copy with the same content may still be stored
            if let Some(other) = self
                .records
                .values()
                .find(|r| r.fingerprint.content_hash == record.fingerprint.content_hash)
            {
                self.by_content_hash
                    .insert(other.fingerprint.content_hash.clone(), other.memory_id.clone());
            }
        }

        if let Some(cluster_id) = self.membership.remove(memory_id) {
            let now_empty = match self.clusters.get_mut(&cluster_id) {
                Some(cluster) => {
                    cluster.members.retain(|m| m != memory_id);
                    if cluster.members.is_empty() {
                        true
                    } else {
                        if cluster.representative == memory_id {
                            cluster.representative = cluster.members[0].clone();
                        }
                        let records = &self.records;
                        let embeddings: Vec<&[f32]> = cluster
                            .members
                            .iter()
                            .filter_map(|m| records.get(m).and_then(|r| r.embedding.as_deref()))
                            .collect();
                        cluster.embedded_members = embeddings.len();
                        cluster.centroid = mean_vector(embeddings).unwrap_or_default();
                        false
                    }
                }
                None => false,
            };
            if now_empty {
                self.clusters.remove(&cluster_id);
            }
        }

        Some(record)
    }

    /// Purge expired fingerprints, then the oldest ones above capacity
    fn enforce_limits(&mut self, config: &DedupConfig, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - chrono::Duration::days(config.fingerprint_ttl_days);
        let mut doomed: Vec<String> = self
            .records
            .values()
            .filter(|r| r.fingerprint.created_at < cutoff)
            .map(|r| r.memory_id.clone())
            .collect();

        let remaining = self.records.len() - doomed.len();
        if remaining > config.max_fingerprints {
            let doomed_set: HashSet<&String> = doomed.iter().collect();
            let mut live: Vec<(&String, DateTime<Utc>)> = self
                .records
                .values()
                .filter(|r| !doomed_set.contains(&r.memory_id))
                .map(|r| (&r.memory_id, r.fingerprint.created_at))
                .collect();
            live.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
            let overflow: Vec<String> = live
                .into_iter()
                .take(remaining - config.max_fingerprints)
                .map(|(id, _)| id.clone())
                .collect();
            doomed.extend(overflow);
        }

        for memory_id in &doomed {
            self.remove(memory_id);
        }
        doomed
    }
}

/// Previews without any signal cannot rule a candidate out
fn preview_similarity(a: &[f32], b: &[f32]) -> f32 {
    let informative = |v: &[f32]| v.iter().any(|x| *x != 0.0);
    if a.is_empty() || b.is_empty() || !informative(a) || !informative(b) {
        return 1.0;
    }
    cosine_similarity(a, b)
}

/// Admission gate and fingerprint store
pub struct Deduplicator {
    config: DedupConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    timeout: Duration,
    index: RwLock<DedupIndex>,
    pending: TtlCache<String, Vec<f32>>,
}

impl Deduplicator {
    pub fn new(
        config: DedupConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            embedder,
            timeout,
            index: RwLock::new(DedupIndex::default()),
            pending: TtlCache::new(PENDING_EMBEDDING_TTL, PENDING_EMBEDDING_CAPACITY),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Decide whether `content` is distinct enough to be stored
    pub async fn should_store(&self, content: &str, memory_type: MemoryType) -> AdmissionDecision {
        let content = content.trim();
        if content.chars().count() < self.config.min_content_length {
            tracing::debug!(
                "Rejecting {} content below minimum length ({} chars)",
                memory_type,
                content.chars().count()
            );
            return AdmissionDecision::too_short();
        }

        let hash = content_hash(content);
        if let Some(existing) = self.index.read().by_content_hash.get(&hash) {
            tracing::debug!("Exact duplicate of memory {}", existing);
            let reason = AdmissionReason::ExactDuplicate;
            return AdmissionDecision::rejected(existing.clone(), 1.0, reason);
        }

        let embedding = self.embedding_for(&hash, content).await;
        let fingerprint =
            MemoryFingerprint::compute(content, memory_type, embedding.as_deref(), &self.config);

        let closest = self
            .index
            .read()
            .closest(&fingerprint, embedding.as_deref(), &self.config);

        match closest {
            Some((memory_id, similarity)) if similarity >= self.config.similarity_threshold => {
                tracing::debug!(
                    "Near duplicate of memory {} (similarity {:.3})",
                    memory_id,
                    similarity
                );
                AdmissionDecision::rejected(memory_id, similarity, AdmissionReason::NearDuplicate)
            }
            closest => AdmissionDecision::admitted(closest),
        }
    }

    /// Store the fingerprint of an admitted memory
    ///
    /// The returned `purged` ids lost their fingerprints to the TTL or the
    /// capacity cap; callers holding those memories must drop them too.
    pub async fn register(
        &self,
        memory_id: &str,
        content: &str,
        memory_type: MemoryType,
    ) -> Registration {
        let content = content.trim();
        let hash = content_hash(content);
        let embedding = match self.pending.remove(&hash) {
            Some(cached) => Some(cached),
            None => embed_or_none(self.embedder.as_deref(), content, self.timeout).await,
        };

        let record = FingerprintRecord {
            memory_id: memory_id.to_string(),
            fingerprint: MemoryFingerprint::compute(
                content,
                memory_type,
                embedding.as_deref(),
                &self.config,
            ),
            embedding,
        };

        let mut index = self.index.write();
        let cluster_id = index.insert(record, &self.config);
        let purged = index.enforce_limits(&self.config, Utc::now());
        let cluster_id = if index.membership.contains_key(memory_id) {
            cluster_id
        } else {
            // The new record itself fell to the capacity cap (max_fingerprints == 0)
            Uuid::nil()
        };

        tracing::info!(
            "Registered memory {} in storage cluster {} ({} fingerprints, {} purged)",
            memory_id,
            cluster_id,
            index.records.len(),
            purged.len()
        );
        Registration {
            storage_cluster: cluster_id,
            purged,
        }
    }

    /// Group near-duplicates among `memory_ids` without changing anything
    pub fn optimize_storage(&self, memory_ids: &[String]) -> OptimizationReport {
        let index = self.index.read();
        let mut report = OptimizationReport::default();

        let mut seen = HashSet::new();
        let mut known: Vec<&FingerprintRecord> = Vec::new();
        for id in memory_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match index.records.get(id) {
                Some(record) => known.push(record),
                None => report.unknown_ids.push(id.clone()),
            }
        }
        report.examined = known.len();

        let pair_similarity = |a: &FingerprintRecord, b: &FingerprintRecord| -> f32 {
            match (a.embedding.as_deref(), b.embedding.as_deref()) {
                (Some(x), Some(y)) => cosine_similarity(x, y),
                _ => jaccard(&a.fingerprint.key_phrases, &b.fingerprint.key_phrases),
            }
        };

        let mut grouped = vec![false; known.len()];
        for i in 0..known.len() {
            if grouped[i] {
                continue;
            }
            let mut members = vec![i];
            let mut similarity_sum = 0.0;
            for j in (i + 1)..known.len() {
                if grouped[j] {
                    continue;
                }
                let sim = pair_similarity(known[i], known[j]);
                if sim >= self.config.optimization_threshold {
                    grouped[j] = true;
                    members.push(j);
                    similarity_sum += sim;
                }
            }
            if members.len() < 2 {
                continue;
            }
            grouped[i] = true;

            let representative = members
                .iter()
                .copied()
                .max_by_key(|&m| (known[m].fingerprint.content_length, std::cmp::Reverse(m)))
                .unwrap_or(i);
            for &m in &members {
                if m != representative {
                    report.redundant_count += 1;
                    report.reclaimable_chars += known[m].fingerprint.content_length;
                }
            }
            report.groups.push(DuplicateGroup {
                representative: known[representative].memory_id.clone(),
                members: members.iter().map(|&m| known[m].memory_id.clone()).collect(),
                mean_similarity: similarity_sum / (members.len() - 1) as f32,
            });
        }

        if report.examined > 0 {
            report.redundancy_ratio = report.redundant_count as f32 / report.examined as f32;
        }
        report
    }

    /// Forget a memory's fingerprint
    pub fn remove(&self, memory_id: &str) -> bool {
        self.index.write().remove(memory_id).is_some()
    }

    pub fn fingerprint(&self, memory_id: &str) -> Option<MemoryFingerprint> {
        self.index
            .read()
            .records
            .get(memory_id)
            .map(|r| r.fingerprint.clone())
    }

    /// Full embedding recorded for a memory, if one was available
    pub fn embedding_of(&self, memory_id: &str) -> Option<Vec<f32>> {
        self.index
            .read()
            .records
            .get(memory_id)
            .and_then(|r| r.embedding.clone())
    }

    pub fn cluster_of(&self, memory_id: &str) -> Option<StorageCluster> {
        let index = self.index.read();
        let cluster_id = index.membership.get(memory_id)?;
        index.clusters.get(cluster_id).cloned()
    }

    pub fn stats(&self) -> DedupStats {
        let index = self.index.read();
        DedupStats {
            fingerprints: index.records.len(),
            clusters: index.clusters.len(),
            largest_cluster: index
                .clusters
                .values()
                .map(|c| c.members.len())
                .max()
                .unwrap_or(0),
        }
    }

    /// Every stored record, oldest first
    pub fn snapshot(&self) -> Vec<FingerprintRecord> {
        let mut records: Vec<FingerprintRecord> =
            self.index.read().records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.fingerprint
                .created_at
                .cmp(&b.fingerprint.created_at)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        records
    }

    /// Replace the index with previously saved records, returning the ids
    /// that were purged on the way in
    pub fn restore(&self, records: Vec<FingerprintRecord>) -> Vec<String> {
        let mut index = DedupIndex::default();
        for record in records {
            index.insert(record, &self.config);
        }
        let purged = index.enforce_limits(&self.config, Utc::now());
        *self.index.write() = index;
        purged
    }

    async fn embedding_for(&self, hash: &str, content: &str) -> Option<Vec<f32>> {
        if let Some(cached) = self.pending.get(&hash.to_string()) {
            return Some(cached);
        }
        let embedding = embed_or_none(self.embedder.as_deref(), content, self.timeout).await?;
        self.pending.insert(hash.to_string(), embedding.clone());
        Some(embedding)
    }
}
