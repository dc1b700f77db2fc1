pub mod fallback;
pub mod keyword;
pub mod semantic;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::error::ConfigError;
use crate::knowledge::chunker::{chunk_corpus, Chunk, ChunkParams};
use crate::knowledge::{Corpus, CorpusSource};

use fallback::FallbackSource;
use keyword::KeywordIndex;
use semantic::{EmbeddingProvider, OpenAiEmbeddings, SemanticIndex};

/// Which scoring strategy the facade is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Keyword,
    Semantic,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Keyword => f.write_str("keyword"),
            StrategyKind::Semantic => f.write_str("semantic"),
        }
    }
}

/// One ranked chunk.
#[derive(Debug, Clone)]
pub struct Passage {
    pub chunk: Chunk,
    pub doc_title: String,
    pub score: f32,
    pub snippet: String,
}

/// Per-document listing for `/sources`.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub source: String,
    pub chars: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct ReloadReport {
    pub changed: bool,
    pub documents: usize,
    pub chunks: usize,
    pub strategy: StrategyKind,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub params: ChunkParams,
    pub semantic_enabled: bool,
}

impl RetrievalSettings {
    pub fn from_config(config: &BotConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            params: config.chunk_params()?,
            semantic_enabled: !config.knowledge.disable_embeddings,
        })
    }
}

/// Build the embedding client described by the config, if semantic search is on.
pub fn embedding_provider(config: &BotConfig) -> Option<Arc<dyn EmbeddingProvider>> {
    if config.knowledge.disable_embeddings {
        return None;
    }
    match OpenAiEmbeddings::new(
        config.embedding_base_url(),
        config.knowledge.embedding_model.clone(),
        config.embedding_api_key(),
    ) {
        Ok(provider) => Some(Arc::new(provider)),
        Err(e) => {
            warn!(error = %e, "embedding provider unavailable, using keyword search");
            None
        }
    }
}

/// Online docs source described by the config, if one is set.
pub fn fallback_source(config: &BotConfig, params: ChunkParams) -> Option<FallbackSource> {
    let url = config.knowledge.fallback_url.as_deref()?;
    match FallbackSource::new(url, config.knowledge.fallback_tokens, params) {
        Ok(source) => Some(source),
        Err(e) => {
            warn!(error = %e, "online docs fallback unavailable");
            None
        }
    }
}

/// Everything derived from one corpus load. Never mutated once published.
struct IndexSnapshot {
    corpus: Corpus,
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
    keyword: KeywordIndex,
    semantic: Option<SemanticIndex>,
}

impl IndexSnapshot {
    fn empty() -> Self {
        Self {
            corpus: Corpus::default(),
            chunks: Vec::new(),
            positions: HashMap::new(),
            keyword: KeywordIndex::build(&[], &[]),
            semantic: None,
        }
    }

    fn strategy(&self) -> StrategyKind {
        if self.semantic.is_some() {
            StrategyKind::Semantic
        } else {
            StrategyKind::Keyword
        }
    }

    fn passage(&self, position: usize, score: f32, query: &str) -> Passage {
        let chunk = &self.chunks[position];
        let title = self
            .corpus
            .docs()
            .get(chunk.doc_index)
            .map_or(chunk.doc_id.as_str(), |d| d.title.as_str());
        make_passage(chunk, title, score, query)
    }
}

fn make_passage(chunk: &Chunk, doc_title: &str, score: f32, query: &str) -> Passage {
    Passage {
        chunk: chunk.clone(),
        doc_title: doc_title.to_string(),
        score,
        snippet: extract_snippet(&chunk.text, query),
    }
}

/// Chunk id to position. The first chunk holding an id keeps it.
fn chunk_positions(chunks: &[Chunk]) -> HashMap<String, usize> {
    let mut positions = HashMap::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let id = chunk.id();
        if positions.contains_key(&id) {
            warn!(id = %id, "duplicate chunk id, not indexed");
            continue;
        }
        positions.insert(id, i);
    }
    positions
}

/// Query-facing front of the knowledge index.
///
/// The strategy is picked once at startup. If the embedding provider fails
/// to register the corpus, the facade drops to keyword search for the rest
/// of the process. When the local corpus has nothing for a query, an
/// optional online docs source is consulted.
pub struct RetrievalFacade {
    source: CorpusSource,
    fallback: Option<FallbackSource>,
    params: ChunkParams,
    provider: RwLock<Option<Arc<dyn EmbeddingProvider>>>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    reload_lock: Mutex<()>,
    query_failure_logged: AtomicBool,
}

impl RetrievalFacade {
    pub async fn build(
        source: CorpusSource,
        settings: RetrievalSettings,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        let provider = if settings.semantic_enabled {
            provider
        } else {
            info!("semantic retrieval disabled by configuration");
            None
        };

        let facade = Self {
            source,
            fallback: None,
            params: settings.params,
            provider: RwLock::new(provider),
            snapshot: RwLock::new(Arc::new(IndexSnapshot::empty())),
            reload_lock: Mutex::new(()),
            query_failure_logged: AtomicBool::new(false),
        };
        facade.reload().await?;
        info!(strategy = %facade.strategy().await, "retrieval ready");
        Ok(facade)
    }

    pub fn with_fallback(mut self, fallback: Option<FallbackSource>) -> Self {
        if fallback.is_some() {
            info!("online docs fallback enabled");
        }
        self.fallback = fallback;
        self
    }

    /// The strategy serving queries against the published index.
    pub async fn strategy(&self) -> StrategyKind {
        self.snapshot.read().await.strategy()
    }

    pub fn params(&self) -> ChunkParams {
        self.params
    }

    /// Re-read the corpus and publish a new index if the content changed.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let _guard = self.reload_lock.lock().await;

        let corpus = self.source.load().await?;
        if corpus.is_empty() {
            warn!(dir = ?self.source.dir(), "knowledge corpus is empty, answers will have no reference notes");
        }
        let current = self.snapshot.read().await.clone();
        if corpus.fingerprint() == current.corpus.fingerprint() && !current.chunks.is_empty() {
            debug!("knowledge corpus unchanged");
            return Ok(ReloadReport {
                changed: false,
                documents: current.corpus.docs().len(),
                chunks: current.chunks.len(),
                strategy: current.strategy(),
            });
        }

        let chunks = chunk_corpus(corpus.docs(), self.params);
        let keyword = KeywordIndex::build(&chunks, corpus.docs());
        let positions = chunk_positions(&chunks);
        let semantic = self.register_semantic(&chunks, &positions).await;

        let next = Arc::new(IndexSnapshot {
            corpus,
            chunks,
            positions,
            keyword,
            semantic,
        });
        let embedded = next.semantic.as_ref().map_or(0, SemanticIndex::len);
        let report = ReloadReport {
            changed: true,
            documents: next.corpus.docs().len(),
            chunks: next.chunks.len(),
            strategy: next.strategy(),
        };
        *self.snapshot.write().await = next;

        info!(
            documents = report.documents,
            chunks = report.chunks,
            embedded,
            strategy = %report.strategy,
            "knowledge index published"
        );
        Ok(report)
    }

    /// Register chunks with the embedding provider. On failure the provider
    /// is dropped for good.
    async fn register_semantic(
        &self,
        chunks: &[Chunk],
        positions: &HashMap<String, usize>,
    ) -> Option<SemanticIndex> {
        let provider = self.provider.read().await.clone()?;
        if chunks.is_empty() {
            return None;
        }
        let entries: Vec<(String, &str)> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id(), i, c.text.as_str()))
            .filter(|(id, i, _)| positions.get(id) == Some(i))
            .map(|(id, _, text)| (id, text))
            .collect();

        match SemanticIndex::register(provider.as_ref(), &entries).await {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    error = %e,
                    "semantic retrieval unavailable, falling back to keyword search for this process"
                );
                *self.provider.write().await = None;
                None
            }
        }
    }

    /// Top `k` passages for `query`, best first. Ties keep corpus order.
    pub async fn search(&self, query: &str, k: usize) -> Vec<Passage> {
        if query.trim().is_empty() || k == 0 {
            return Vec::new();
        }
        let local = self.search_local(query, k).await;
        match &self.fallback {
            Some(fallback) if local.is_empty() => {
                debug!(query, "no local passages, trying online docs");
                fallback.search(query, k).await
            }
            _ => local,
        }
    }

    async fn search_local(&self, query: &str, k: usize) -> Vec<Passage> {
        let snapshot = self.snapshot.read().await.clone();
        if snapshot.chunks.is_empty() {
            return Vec::new();
        }

        let provider = self.provider.read().await.clone();
        let scored = match (provider, snapshot.semantic.as_ref()) {
            (Some(provider), Some(index)) => {
                match index.query(provider.as_ref(), query, k).await {
                    Ok(hits) => hits
                        .into_iter()
                        .filter_map(|(id, score)| {
                            snapshot.positions.get(&id).map(|&pos| (pos, score))
                        })
                        .collect(),
                    Err(e) => {
                        if !self.query_failure_logged.swap(true, Ordering::Relaxed) {
                            warn!(error = %e, "semantic query failed, serving keyword results");
                        }
                        snapshot.keyword.score(query)
                    }
                }
            }
            _ => snapshot.keyword.score(query),
        };

        rank(&snapshot.chunks, scored, k)
            .into_iter()
            .map(|(pos, score)| snapshot.passage(pos, score, query))
            .collect()
    }

    pub async fn documents(&self) -> Vec<DocumentSummary> {
        let snapshot = self.snapshot.read().await.clone();
        snapshot
            .corpus
            .docs()
            .iter()
            .enumerate()
            .map(|(i, doc)| DocumentSummary {
                id: doc.id.clone(),
                title: doc.title.clone(),
                source: doc.source.clone(),
                chars: doc.body.chars().count(),
                chunks: snapshot.chunks.iter().filter(|c| c.doc_index == i).count(),
            })
            .collect()
    }
}

/// Sort by score (descending), then document order, then offset; keep `k`.
fn rank(chunks: &[Chunk], mut scored: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    scored.sort_by(|a, b| {
        let (ca, cb) = (&chunks[a.0], &chunks[b.0]);
        b.1.total_cmp(&a.1)
            .then(ca.doc_index.cmp(&cb.doc_index))
            .then(ca.offset.cmp(&cb.offset))
    });
    scored.truncate(k);
    scored
}

/// A few lines around the first line mentioning a query term, capped at 500
/// chars. Falls back to the opening lines.
pub fn extract_snippet(text: &str, query: &str) -> String {
    const CONTEXT_LINES: usize = 3;
    const MAX_CHARS: usize = 500;

    let terms = keyword::query_terms(query);
    let lines: Vec<&str> = text.lines().collect();
    let hit = lines.iter().position(|line| {
        let tokens = keyword::tokenize(line);
        terms.iter().any(|t| tokens.contains(t))
    });

    let snippet = match hit {
        Some(i) => {
            let start = i.saturating_sub(CONTEXT_LINES);
            let end = (i + CONTEXT_LINES + 1).min(lines.len());
            lines[start..end].join("\n")
        }
        None => lines.iter().take(5).copied().collect::<Vec<_>>().join("\n"),
    };

    if snippet.chars().count() <= MAX_CHARS {
        snippet
    } else {
        let cut: String = snippet.chars().take(MAX_CHARS).collect();
        format!("{}...", cut)
    }
}
