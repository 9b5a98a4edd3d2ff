//! Embedding provider contract and the local fastembed implementation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{within, Error, Result};

/// Anything that can turn text into a dense vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Call the provider, mapping failure, timeout and empty output to `None`
///
/// Every consumer treats `None` as "no embedding" and switches to its lexical
/// fallback.
pub async fn embed_or_none(
    provider: Option<&dyn EmbeddingProvider>,
    text: &str,
    timeout: Duration,
) -> Option<Vec<f32>> {
    let provider = provider?;
    match within(timeout, provider.embed(text)).await {
        Ok(vector) if !vector.is_empty() => Some(vector),
        Ok(_) => {
            tracing::warn!("Embedding provider returned an empty vector, using lexical fallback");
            None
        }
        Err(e) => {
            tracing::warn!("Embedding failed, using lexical fallback: {}", e);
            None
        }
    }
}

/// Resolve a configured model name to a fastembed model
pub fn model_for(name: &str) -> Result<EmbeddingModel> {
    match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        other => Err(Error::config(format!("Unknown embedding model: {}", other))),
    }
}

/// Embedding provider running a fastembed model locally
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimensions: usize,
}

impl FastEmbedProvider {
    /// Load `config.embedding_model`, expecting `config.embedding_dimensions` per vector
    pub fn new(config: &Config) -> Result<Self> {
        let choice = model_for(&config.embedding_model)?;
        // Model downloads automatically on first use to ~/.cache/fastembed
        let model = TextEmbedding::try_new(
            InitOptions::new(choice).with_show_download_progress(true),
        )
        .map_err(|e| Error::embedding(format!("Failed to load embedding model: {}", e)))?;

        tracing::info!(
            "Loaded embedding model {} ({} dims)",
            config.embedding_model,
            config.embedding_dimensions
        );
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimensions: config.embedding_dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut guard = self.model.lock().await;
        let embeddings = guard
            .embed(vec![text.to_string()], None)
            .map_err(|e| Error::embedding(format!("Embedding failed: {}", e)))?;

        let vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("No embedding returned"))?;
        if vector.len() != self.dimensions {
            return Err(Error::embedding(format!(
                "Expected {} dimensions, model produced {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

/// Token counter using tiktoken
pub struct TokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TokenCounter {
    /// Create a new token counter for a specific model
    pub fn new(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| Error::config(format!("Failed to load tokenizer for {}: {}", model, e)))?;

        Ok(Self { bpe })
    }

    /// Create a token counter using the cl100k_base encoding
    pub fn for_gpt() -> Result<Self> {
        Self::new("gpt-4")
    }

    /// Count tokens in a text
    pub fn count(&self, text: &str) -> u32 {
        self.bpe.encode_with_special_tokens(text).len() as u32
    }

    /// Estimate tokens without using the tokenizer (faster, less accurate)
    pub fn estimate(text: &str) -> u32 {
        // ~4 characters per token is a reasonable estimate
        text.len().div_ceil(4) as u32
    }
}

/// Count with the tokenizer when one is loaded, otherwise estimate
pub fn count_tokens(counter: Option<&TokenCounter>, text: &str) -> u32 {
    match counter {
        Some(counter) => counter.count(text),
        None => TokenCounter::estimate(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, HashingEmbedder, SlowEmbedder};

    #[tokio::test]
    async fn test_embed_or_none_passes_vectors_through() {
        let embedder = HashingEmbedder::default();
        let provider = Some(&embedder as &dyn EmbeddingProvider);
        let vector = embed_or_none(provider, "mountain trails", Duration::from_secs(1)).await;
        assert_eq!(vector.map(|v| v.len()), Some(HashingEmbedder::DIMENSIONS));
    }

    #[tokio::test]
    async fn test_embed_or_none_falls_back_on_failure_and_timeout() {
        let failing = FailingEmbedder;
        let provider = Some(&failing as &dyn EmbeddingProvider);
        assert!(embed_or_none(provider, "text", Duration::from_secs(1)).await.is_none());

        let slow = SlowEmbedder(Duration::from_millis(200));
        let provider = Some(&slow as &dyn EmbeddingProvider);
        assert!(embed_or_none(provider, "text", Duration::from_millis(10)).await.is_none());

        assert!(embed_or_none(None, "text", Duration::from_secs(1)).await.is_none());
    }

    #[test]
    fn test_model_names_resolve() {
        assert!(matches!(model_for("all-MiniLM-L6-v2"), Ok(EmbeddingModel::AllMiniLML6V2)));
        assert!(matches!(model_for("bge-small-en-v1.5"), Ok(EmbeddingModel::BGESmallENV15)));
        assert!(matches!(model_for("word2vec"), Err(Error::Config(_))));
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(TokenCounter::estimate(""), 0);
        assert_eq!(TokenCounter::estimate("abcd"), 1);
        assert_eq!(TokenCounter::estimate("abcde"), 2);
        assert_eq!(count_tokens(None, "abcdefgh"), 2);
    }
}
