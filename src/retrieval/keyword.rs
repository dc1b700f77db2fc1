//! Term-overlap scoring with rarity weighting. No I/O, fully deterministic.

use std::collections::{HashMap, HashSet};

use crate::knowledge::chunker::Chunk;
use crate::knowledge::KnowledgeDocument;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "about", "also", "am", "be", "been", "can", "could", "did", "do",
    "does", "for", "from", "get", "have", "how", "i", "if", "in", "into", "is", "it", "just",
    "know", "me", "my", "of", "on", "or", "please", "should", "so", "tell", "that", "the",
    "their", "there", "they", "this", "to", "was", "what", "when", "where", "which", "who",
    "why", "will", "with", "would", "you", "your",
];

/// Weight added when a query term names the chunk's document (id or title).
const LABEL_BONUS: f32 = 0.5;
/// Weight added when the whole multi-word query appears verbatim.
const PHRASE_BONUS: f32 = 2.0;

/// Lowercase alphanumeric tokens with simple plural folding
/// ("arrests" -> "arrest", but "bus" and "class" stay).
pub fn tokenize(text: &str) -> Vec<String> {
    raw_tokens(text).map(|t| fold_plural(&t)).collect()
}

fn raw_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn fold_plural(token: &str) -> String {
    if token.chars().count() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

/// Distinct query terms in first-seen order. Stop words are dropped unless
/// that would leave nothing.
pub fn query_terms(query: &str) -> Vec<String> {
    let raw: Vec<String> = raw_tokens(query).collect();
    let content: Vec<&String> = raw
        .iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect();
    let kept: Vec<&String> = if content.is_empty() {
        raw.iter().collect()
    } else {
        content
    };

    let mut seen = HashSet::new();
    kept.into_iter()
        .map(|t| fold_plural(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

struct ChunkStats {
    term_freq: HashMap<String, u32>,
    label_terms: HashSet<String>,
    lowered: String,
}

pub struct KeywordIndex {
    chunks: Vec<ChunkStats>,
    doc_freq: HashMap<String, u32>,
}

impl KeywordIndex {
    pub fn build(chunks: &[Chunk], docs: &[KnowledgeDocument]) -> Self {
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let stats = chunks
            .iter()
            .map(|chunk| {
                let mut term_freq: HashMap<String, u32> = HashMap::new();
                for token in tokenize(&chunk.text) {
                    *term_freq.entry(token).or_default() += 1;
                }
                for term in term_freq.keys() {
                    *doc_freq.entry(term.clone()).or_default() += 1;
                }
                let label_terms: HashSet<String> = docs
                    .get(chunk.doc_index)
                    .map(|d| {
                        tokenize(&d.id)
                            .into_iter()
                            .chain(tokenize(&d.title))
                            .collect()
                    })
                    .unwrap_or_default();
                ChunkStats {
                    term_freq,
                    label_terms,
                    lowered: chunk.text.to_lowercase(),
                }
            })
            .collect();

        Self {
            chunks: stats,
            doc_freq,
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.chunks.len().max(1) as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0).max(1) as f32;
        (1.0 + n / df).ln()
    }

    /// Score every chunk against `query`. Returns `(chunk position, score)`
    /// for chunks scoring above zero, in chunk order.
    pub fn score(&self, query: &str) -> Vec<(usize, f32)> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let phrase = query
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();
        let use_phrase = terms.len() > 1 && !phrase.is_empty();

        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(i, stats)| {
                let mut score = 0.0f32;
                let mut matched = false;
                for term in &terms {
                    if let Some(&tf) = stats.term_freq.get(term) {
                        score += (1.0 + (tf as f32).ln()) * self.idf(term);
                        matched = true;
                    }
                    if stats.label_terms.contains(term) {
                        score += LABEL_BONUS * self.idf(term);
                    }
                }
                if !matched {
                    return None;
                }
                if use_phrase && stats.lowered.contains(&phrase) {
                    score += PHRASE_BONUS;
                }
                Some((i, score))
            })
            .collect()
    }
}
