//! Deterministic collaborators for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::generation::{ExtractedFact, FactExtractor, GenerativeTextProvider, PromptMessage};
use crate::text::content_words;

/// Bag-of-words embedder: each content word is hashed into one of a fixed
/// number of buckets. Texts with the same content words embed identically.
#[derive(Debug, Default)]
pub struct HashingEmbedder {
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub const DIMENSIONS: usize = 64;

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; Self::DIMENSIONS];
        for word in content_words(text) {
            v[fnv1a(&word) % Self::DIMENSIONS] += 1.0;
        }
        v
    }
}

fn fnv1a(word: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash as usize
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }
}

/// Embedder whose every call fails
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::embedding("embedding service unavailable"))
    }
}

/// Embedder that answers only after a delay
pub struct SlowEmbedder(pub Duration);

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.0).await;
        Ok(HashingEmbedder::vector(text))
    }
}

/// Generator replaying canned responses in order, then failing
pub struct ScriptedGenerator {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<String>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl GenerativeTextProvider for ScriptedGenerator {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        self.prompts.lock().push(messages.to_vec());
        self.responses
            .lock()
            .pop()
            .ok_or_else(|| Error::generation("script exhausted"))
    }
}

/// Generator whose every call fails
pub struct FailingGenerator;

#[async_trait]
impl GenerativeTextProvider for FailingGenerator {
    async fn complete(
        &self,
        _messages: &[PromptMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        Err(Error::generation("model overloaded"))
    }
}

/// Fact extractor returning a fixed list
pub struct StaticFactExtractor(pub Vec<ExtractedFact>);

#[async_trait]
impl FactExtractor for StaticFactExtractor {
    async fn extract_facts(&self, _text: &str) -> Result<Vec<ExtractedFact>> {
        Ok(self.0.clone())
    }
}
