#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use dieah_recall::text::content_words;
use dieah_recall::{Config, EmbeddingProvider, MemoryEngine, Result};

/// Bag-of-words embedder; texts with the same content words embed identically
pub struct WordBucketEmbedder;

impl WordBucketEmbedder {
    const DIMENSIONS: usize = 128;

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; Self::DIMENSIONS];
        for word in content_words(text) {
            let bucket = word
                .bytes()
                .fold(5381usize, |h, b| h.wrapping_mul(33) ^ usize::from(b));
            v[bucket % Self::DIMENSIONS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for WordBucketEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector(text))
    }
}

pub fn engine_with(config: Config) -> MemoryEngine {
    MemoryEngine::builder(config)
        .embedder(Arc::new(WordBucketEmbedder))
        .build()
        .unwrap()
}

pub fn engine() -> MemoryEngine {
    engine_with(Config::default())
}
