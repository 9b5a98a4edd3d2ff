//! Configuration for dieah-recall

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the memory engine
///
/// Every field has a default, so a JSON config file only needs to name the
/// values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for snapshots and transcripts
    pub data_dir: PathBuf,

    /// Local embedding model loaded by `FastEmbedProvider`
    pub embedding_model: String,

    /// Vector length the embedding model must produce
    pub embedding_dimensions: usize,

    /// Upper bound on any single embedding, generation or fact-extraction call
    pub collaborator_timeout_ms: u64,

    pub dedup: DedupConfig,
    pub clustering: ClusterConfig,
    pub prioritizer: PrioritizerConfig,
    pub summarizer: SummarizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dieah-recall");

        Self {
            data_dir,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimensions: 384,
            collaborator_timeout_ms: 10_000,
            dedup: DedupConfig::default(),
            clustering: ClusterConfig::default(),
            prioritizer: PrioritizerConfig::default(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load a config from a JSON file, filling unspecified fields with defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the scoring math meaningless
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::config(format!("{name} must be within [0, 1], got {v}")))
            }
        };

        unit("dedup.similarity_threshold", self.dedup.similarity_threshold)?;
        unit("dedup.merge_threshold", self.dedup.merge_threshold)?;
        unit("dedup.optimization_threshold", self.dedup.optimization_threshold)?;
        unit("clustering.auto_cluster_threshold", self.clustering.auto_cluster_threshold)?;
        unit("prioritizer.diversity_factor", self.prioritizer.diversity_factor)?;

        if self.prioritizer.temporal_decay_days <= 0.0 {
            return Err(Error::config("prioritizer.temporal_decay_days must be positive"));
        }
        if self.summarizer.min_turns > self.summarizer.max_turns {
            return Err(Error::config(format!(
                "summarizer.min_turns ({}) exceeds summarizer.max_turns ({})",
                self.summarizer.min_turns, self.summarizer.max_turns
            )));
        }
        if self.embedding_dimensions == 0 {
            return Err(Error::config("embedding_dimensions must be at least 1"));
        }
        if self.dedup.max_fingerprints == 0 {
            return Err(Error::config("dedup.max_fingerprints must be at least 1"));
        }
        if self.clustering.min_cluster_size == 0 {
            return Err(Error::config("clustering.min_cluster_size must be at least 1"));
        }
        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Get the path to the SQLite snapshot database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("recall.db")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.data_dir.join("conversations"))?;
        Ok(())
    }
}

/// Deduplicator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Full-embedding similarity at or above which new content is rejected
    pub similarity_threshold: f32,

    /// Preview candidates within this margin below the threshold get a full comparison
    pub preview_margin: f32,

    /// Number of leading embedding dimensions kept in a fingerprint preview
    pub preview_dims: usize,

    /// Content shorter than this (in characters, after trimming) is never stored
    pub min_content_length: usize,

    pub max_fingerprints: usize,
    pub fingerprint_ttl_days: i64,

    /// Similarity needed to join an existing storage cluster on registration
    pub merge_threshold: f32,

    /// Similarity used to group redundant memories in `optimize_storage`
    pub optimization_threshold: f32,

    pub key_phrase_limit: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
            preview_margin: 0.1,
            preview_dims: 32,
            min_content_length: 20,
            max_fingerprints: 10_000,
            fingerprint_ttl_days: 30,
            merge_threshold: 0.8,
            optimization_threshold: 0.8,
            key_phrase_limit: 10,
        }
    }
}

/// Topic clusterer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub min_cluster_size: usize,
    pub max_clusters: usize,

    /// Best-match score below which a new cluster is created
    pub auto_cluster_threshold: f32,

    /// Clusters above this score are reported as secondary topics
    pub secondary_threshold: f32,

    /// Centroid similarity above which two clusters are marked related
    pub related_threshold: f32,

    pub centroid_weight: f32,
    pub keyword_weight: f32,
    pub max_keywords: usize,

    pub recluster_interval_secs: u64,
    pub recluster_min_items: usize,
    pub kmeans_iterations: usize,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            max_clusters: 50,
            auto_cluster_threshold: 0.6,
            secondary_threshold: 0.5,
            related_threshold: 0.6,
            centroid_weight: 0.7,
            keyword_weight: 0.3,
            max_keywords: 10,
            recluster_interval_secs: 3600,
            recluster_min_items: 10,
            kmeans_iterations: 50,
            seed: 42,
        }
    }
}

/// Weights for the six prioritization signals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub semantic: f32,
    pub temporal: f32,
    pub frequency: f32,
    pub interaction: f32,
    pub emotional: f32,
    pub topic: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.35,
            temporal: 0.20,
            frequency: 0.15,
            interaction: 0.10,
            emotional: 0.10,
            topic: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f32 {
        self.semantic
            + self.temporal
            + self.frequency
            + self.interaction
            + self.emotional
            + self.topic
    }
}

/// Context prioritizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritizerConfig {
    pub weights: ScoringWeights,
    pub diversity_factor: f32,
    pub max_context_items: usize,

    /// Diversity filtering only applies from this many candidates upward
    pub min_candidates_for_diversity: usize,

    /// Days for the temporal signal to drop to ~37%
    pub temporal_decay_days: f64,

    /// Days for the frequency signal to drop to ~37% since last access
    pub frequency_decay_days: f64,

    /// Access count at which the frequency signal saturates
    pub frequency_saturation: u32,

    /// Upper bound for any weight after `adjust_weights`
    pub max_weight: f32,

    pub score_cache_ttl_secs: u64,
    pub score_cache_max_entries: usize,
}

impl Default for PrioritizerConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            diversity_factor: 0.2,
            max_context_items: 20,
            min_candidates_for_diversity: 5,
            temporal_decay_days: 7.0,
            frequency_decay_days: 30.0,
            frequency_saturation: 10,
            max_weight: 0.5,
            score_cache_ttl_secs: 300,
            score_cache_max_entries: 5_000,
        }
    }
}

/// Conversation summarizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub min_turns: usize,
    pub max_turns: usize,
    pub staleness_hours: i64,
    pub size_threshold_chars: usize,
    pub target_compression: f32,
    pub max_flow_entries: usize,
    pub max_facts: usize,
    pub min_fact_confidence: f32,
    pub reply_excerpt_chars: usize,
    pub summary_ttl_secs: u64,
    pub summary_cache_max_entries: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            min_turns: 10,
            max_turns: 50,
            staleness_hours: 6,
            size_threshold_chars: 8_000,
            target_compression: 0.3,
            max_flow_entries: 10,
            max_facts: 10,
            min_fact_confidence: 0.7,
            reply_excerpt_chars: 100,
            summary_ttl_secs: 24 * 3600,
            summary_cache_max_entries: 1_000,
        }
    }
}
