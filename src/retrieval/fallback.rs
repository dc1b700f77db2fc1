//! Online documentation consulted when the local corpus has nothing.
//!
//! The endpoint takes `topic` and `tokens` query parameters and returns plain
//! text (an `llms.txt` style dump). Each topic's text is chunked and keyword
//! indexed once, then reused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::keyword::{query_terms, KeywordIndex};
use super::{make_passage, rank, Passage};
use crate::knowledge::chunker::{chunk_corpus, Chunk, ChunkParams};
use crate::knowledge::{fetch_text, KnowledgeDocument};

/// Document id of fetched topic text.
pub const FALLBACK_ID: &str = "docs@remote";

const DEFAULT_TITLE: &str = "Behind Bars online docs";

/// Topics kept before the cache is cleared.
const MAX_TOPICS: usize = 128;

struct TopicIndex {
    doc: KnowledgeDocument,
    chunks: Vec<Chunk>,
    keyword: KeywordIndex,
}

pub struct FallbackSource {
    http: reqwest::Client,
    url: String,
    tokens: u32,
    params: ChunkParams,
    topics: Mutex<HashMap<String, Arc<TopicIndex>>>,
}

impl FallbackSource {
    pub fn new(url: impl Into<String>, tokens: u32, params: ChunkParams) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
            tokens,
            params,
            topics: Mutex::new(HashMap::new()),
        })
    }

    /// Cache key and `topic` parameter for a query: its search terms.
    pub fn topic(query: &str) -> Option<String> {
        let terms = query_terms(query);
        (!terms.is_empty()).then(|| terms.join(" "))
    }

    /// Top `k` passages from the online docs for `query`. Fetch failures
    /// yield nothing and are not cached.
    pub async fn search(&self, query: &str, k: usize) -> Vec<Passage> {
        let Some(topic) = Self::topic(query) else {
            return Vec::new();
        };
        let Some(index) = self.topic_index(&topic).await else {
            return Vec::new();
        };

        rank(&index.chunks, index.keyword.score(query), k)
            .into_iter()
            .map(|(pos, score)| make_passage(&index.chunks[pos], &index.doc.title, score, query))
            .collect()
    }

    async fn topic_index(&self, topic: &str) -> Option<Arc<TopicIndex>> {
        if let Some(cached) = self.topics.lock().await.get(topic) {
            debug!(topic, "online docs served from cache");
            return Some(cached.clone());
        }

        let url = match reqwest::Url::parse_with_params(
            &self.url,
            &[("topic", topic.to_string()), ("tokens", self.tokens.to_string())],
        ) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %self.url, error = %e, "invalid online docs URL");
                return None;
            }
        };
        let body = match fetch_text(&self.http, url.as_str()).await {
            Ok(body) => body,
            Err(e) => {
                warn!(topic, error = %e, "online docs fetch failed");
                return None;
            }
        };

        let mut doc = KnowledgeDocument::new(FALLBACK_ID, body, format!("url:{}", url));
        if doc.title == FALLBACK_ID {
            doc.title = DEFAULT_TITLE.to_string();
        }
        let docs = [doc];
        let chunks = chunk_corpus(&docs, self.params);
        let keyword = KeywordIndex::build(&chunks, &docs);
        let [doc] = docs;
        info!(topic, chunks = chunks.len(), "online docs indexed");

        let index = Arc::new(TopicIndex {
            doc,
            chunks,
            keyword,
        });
        let mut topics = self.topics.lock().await;
        if topics.len() >= MAX_TOPICS {
            topics.clear();
        }
        topics.insert(topic.to_string(), index.clone());
        Some(index)
    }
}
