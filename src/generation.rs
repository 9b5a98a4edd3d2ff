//! Generative-text and fact-extraction collaborator contracts
//!
//! Both collaborators are optional. Their output is only ever a hint: any
//! failure, timeout or malformed response is logged and replaced by a local
//! deterministic fallback by the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{within, Result};
use crate::message::Role;

/// One message of a prompt sent to the generative-text provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A language model used for keyword extraction, topic naming and summary text
#[async_trait]
pub trait GenerativeTextProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;
}

/// A fact pulled out of conversation text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub fact: String,
    pub confidence: f32,
}

#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract_facts(&self, text: &str) -> Result<Vec<ExtractedFact>>;
}

/// Run a completion, mapping failure, timeout and blank output to `None`
pub async fn complete_or_none(
    provider: Option<&dyn GenerativeTextProvider>,
    messages: &[PromptMessage],
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
) -> Option<String> {
    let provider = provider?;
    let call = provider.complete(messages, max_tokens, temperature);
    match within(timeout, call).await {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => {
            tracing::warn!("Generative provider returned no text, using fallback");
            None
        }
        Err(e) => {
            tracing::warn!("Generation failed, using fallback: {}", e);
            None
        }
    }
}

/// Run fact extraction, mapping failure and timeout to an empty list
pub async fn extract_facts_or_empty(
    extractor: Option<&dyn FactExtractor>,
    text: &str,
    timeout: Duration,
) -> Vec<ExtractedFact> {
    let Some(extractor) = extractor else {
        return Vec::new();
    };
    within(timeout, extractor.extract_facts(text))
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Fact extraction failed, continuing without facts: {}", e);
            Vec::new()
        })
}

/// Parse a model response that should be a JSON array of strings
///
/// Markdown code fences and surrounding prose are tolerated; anything that is
/// not a list of strings is rejected. Entries are trimmed, lowercased and
/// de-duplicated; an empty list counts as malformed.
pub fn parse_string_list(raw: &str) -> Option<Vec<String>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }

    let values: Vec<serde_json::Value> = match serde_json::from_str(&raw[start..=end]) {
        Ok(values) => values,
        Err(e) => {
            tracing::debug!("Discarding malformed list response: {}", e);
            return None;
        }
    };

    let mut items: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let text = value.as_str()?.trim().to_lowercase();
        if !text.is_empty() && !items.contains(&text) {
            items.push(text);
        }
    }

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingGenerator, ScriptedGenerator};

    #[test]
    fn test_parse_string_list() {
        assert_eq!(
            parse_string_list(r#"["Hiking", "mountains", "hiking"]"#),
            Some(vec!["hiking".to_string(), "mountains".to_string()])
        );
        assert_eq!(
            parse_string_list("```json\n[\"travel\"]\n```"),
            Some(vec!["travel".to_string()])
        );
    }

    #[test]
    fn test_parse_string_list_rejects_malformed() {
        assert_eq!(parse_string_list("hiking, mountains"), None);
        assert_eq!(parse_string_list(r#"{"topics": "hiking"}"#), None);
        assert_eq!(parse_string_list("[1, 2, 3]"), None);
        assert_eq!(parse_string_list("[]"), None);
        assert_eq!(parse_string_list("[\"unterminated"), None);
    }

    #[tokio::test]
    async fn test_complete_or_none() {
        let scripted = ScriptedGenerator::new(vec!["  a summary  ".to_string()]);
        let messages = vec![PromptMessage::user("summarize")];
        let out = complete_or_none(
            Some(&scripted as &dyn GenerativeTextProvider),
            &messages,
            64,
            0.2,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(out.as_deref(), Some("a summary"));

        let failing = FailingGenerator;
        let out = complete_or_none(
            Some(&failing as &dyn GenerativeTextProvider),
            &messages,
            64,
            0.2,
            Duration::from_secs(1),
        )
        .await;
        assert!(out.is_none());
    }
}
