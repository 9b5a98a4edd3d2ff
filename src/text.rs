//! Lexical helpers: tokenizing, frequency keywords, overlap measures and the
//! small word lists used for emotion, sentiment and intent detection.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A run of CJK ideographs or kana, or a word in any other script
static WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<cjk>[\p{Han}\p{Hiragana}\p{Katakana}]+)",
        r"|(?P<word>[\p{L}&&[^\p{Han}\p{Hiragana}\p{Katakana}]]",
        r"[\p{L}\p{M}'\x{2019}&&[^\p{Han}\p{Hiragana}\p{Katakana}]]*)",
    ))
    .expect("valid word regex")
});

static CJK_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{Han}\p{Hiragana}\p{Katakana}]+$").expect("valid cjk regex")
});

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "don't", "for", "from", "get", "got", "had", "has", "have", "having", "he", "her",
    "here", "hers", "him", "his", "how", "i", "i'm", "i've", "if", "in", "into", "is", "it",
    "it's", "its", "just", "me", "more", "most", "much", "my", "no", "not", "now", "of", "on",
    "one", "only", "or", "other", "our", "out", "over", "really", "she", "should", "so", "some",
    "such", "than", "that", "that's", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "up", "us", "very", "was", "we", "were", "what",
    "when", "where", "which", "while", "who", "why", "will", "with", "would", "you", "you're",
    "your", "yours", "yes", "yeah", "okay", "ok", "well", "let", "like", "want", "know", "think",
    "tell", "said", "say", "go", "going", "make", "way", "thing", "things", "lot",
];

const EMOTION_WORDS: &[&str] = &[
    "love", "loved", "loving", "hate", "hated", "happy", "sad", "angry", "upset", "excited",
    "afraid", "scared", "worried", "anxious", "nervous", "lonely", "miss", "grateful", "thankful",
    "proud", "ashamed", "hurt", "joy", "cry", "crying", "depressed", "stressed", "frustrated",
    "glad", "thrilled", "terrified", "heartbroken", "furious", "delighted", "feel", "feeling",
    "feelings", "emotional", "amazing", "awful", "terrible", "wonderful", "adore",
];

const POSITIVE_WORDS: &[&str] = &[
    "love", "loved", "happy", "glad", "great", "good", "excited", "wonderful", "amazing",
    "awesome", "thanks", "thank", "grateful", "proud", "enjoy", "enjoyed", "fun", "nice",
    "delighted", "thrilled", "better", "best", "excellent", "fantastic", "beautiful", "adore",
    "relieved", "calm", "hopeful",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "sad", "angry", "upset", "afraid", "scared", "worried", "anxious", "lonely", "hurt",
    "bad", "terrible", "awful", "worse", "worst", "depressed", "stressed", "frustrated", "tired",
    "annoyed", "disappointed", "sorry", "cry", "crying", "heartbroken", "furious", "nervous",
    "miserable", "problem",
];

const QUESTION_OPENERS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "is", "are", "do", "does", "did",
    "can", "could", "would", "should", "will",
];

const REQUEST_CUES: &[&str] = &[
    "please", "could you", "can you", "would you", "help me", "i need", "show me", "tell me",
    "give me",
];

const GRATITUDE_CUES: &[&str] = &["thank", "thanks", "appreciate", "grateful"];

/// Lowercased word tokens, apostrophes kept inside words
///
/// Scripts written without spaces (Chinese, Japanese) have no word
/// boundaries to find, so their runs become overlapping character bigrams.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();
    for caps in WORD_RE.captures_iter(&lower) {
        if let Some(run) = caps.name("cjk") {
            let chars: Vec<char> = run.as_str().chars().collect();
            if chars.len() == 1 {
                tokens.push(run.as_str().to_string());
            } else {
                tokens.extend(chars.windows(2).map(|pair| pair.iter().collect::<String>()));
            }
        } else if let Some(word) = caps.name("word") {
            let word = word.as_str().trim_end_matches(['\'', '\u{2019}']);
            if !word.is_empty() {
                tokens.push(word.to_string());
            }
        }
    }
    tokens
}

fn is_cjk_token(token: &str) -> bool {
    CJK_TOKEN_RE.is_match(token)
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Tokens worth indexing: no stop words, at least three characters
/// (CJK bigrams always count)
pub fn content_words(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| (w.chars().count() >= 3 || is_cjk_token(w)) && !is_stop_word(w))
        .collect()
}

/// Frequency-ranked keywords; ties keep first-occurrence order
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    rank_by_frequency(content_words(text), limit)
}

/// Rank words by count, breaking ties by first occurrence
pub fn rank_by_frequency<I>(words: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, word) in words.into_iter().enumerate() {
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(limit).map(|(word, _, _)| word).collect()
}

/// Jaccard index of two word lists treated as sets
pub fn jaccard<S: AsRef<str>>(a: &[S], b: &[S]) -> f32 {
    let set_a: HashSet<&str> = a.iter().map(|s| s.as_ref()).collect();
    let set_b: HashSet<&str> = b.iter().map(|s| s.as_ref()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union as f32
}

/// Fraction of `query` words that also appear in `target`
pub fn overlap_ratio<S: AsRef<str>>(query: &[S], target: &[S]) -> f32 {
    let query_set: HashSet<&str> = query.iter().map(|s| s.as_ref()).collect();
    if query_set.is_empty() {
        return 0.0;
    }
    let target_set: HashSet<&str> = target.iter().map(|s| s.as_ref()).collect();
    query_set.intersection(&target_set).count() as f32 / query_set.len() as f32
}

/// Whether the text carries emotional language
pub fn has_emotional_language(text: &str) -> bool {
    tokenize(text).iter().any(|w| EMOTION_WORDS.contains(&w.as_str()))
}

/// Coarse sentiment of a piece of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Negative => write!(f, "negative"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Positive => write!(f, "positive"),
        }
    }
}

/// Positive and negative lexicon hit counts
pub fn sentiment_counts(text: &str) -> (usize, usize) {
    tokenize(text).iter().fold((0, 0), |(pos, neg), w| {
        if POSITIVE_WORDS.contains(&w.as_str()) {
            (pos + 1, neg)
        } else if NEGATIVE_WORDS.contains(&w.as_str()) {
            (pos, neg + 1)
        } else {
            (pos, neg)
        }
    })
}

pub fn classify_sentiment(text: &str) -> Sentiment {
    let (pos, neg) = sentiment_counts(text);
    match pos.cmp(&neg) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

/// What a user turn is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Question,
    Request,
    Gratitude,
    Exclamation,
    Statement,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::Question => write!(f, "question"),
            Intent::Request => write!(f, "request"),
            Intent::Gratitude => write!(f, "gratitude"),
            Intent::Exclamation => write!(f, "exclamation"),
            Intent::Statement => write!(f, "statement"),
        }
    }
}

pub fn classify_intent(text: &str) -> Intent {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    let first_word = tokenize(&lower).into_iter().next().unwrap_or_default();

    let opens_question = QUESTION_OPENERS.contains(&first_word.as_str());
    if trimmed.ends_with('?') || (opens_question && lower.contains('?')) {
        Intent::Question
    } else if REQUEST_CUES.iter().any(|cue| lower.contains(cue)) {
        Intent::Request
    } else if GRATITUDE_CUES.iter().any(|cue| lower.contains(cue)) {
        Intent::Gratitude
    } else if trimmed.ends_with('!') {
        Intent::Exclamation
    } else {
        Intent::Statement
    }
}

/// Truncate to at most `max` characters, appending an ellipsis when cut
pub fn truncate_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

/// Whitespace-collapsed, lowercased form used for exact-match hashing
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
