//! Delegated retrieval through an embedding service.
//!
//! Chunks are registered once per corpus snapshot; queries are read-only
//! cosine-similarity lookups against the registered vectors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RetrievalError;

/// Inputs per embeddings request.
const BATCH_SIZE: usize = 64;

/// Something that turns text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbeddings {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/embeddings") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/embeddings", base)
        } else {
            format!("{}/v1/embeddings", base)
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

fn unavailable(message: String) -> RetrievalError {
    RetrievalError::Unavailable {
        provider: "openai-embeddings".to_string(),
        message,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai-embeddings"
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(batch_size = texts.len(), model = %self.model, "embedding batch");

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(unavailable(format!("API returned {status}: {detail}")));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| unavailable(format!("failed to parse response: {e}")))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Registered chunk vectors for one corpus snapshot.
pub struct SemanticIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl SemanticIndex {
    /// Embed and register every `(chunk_id, text)` entry.
    pub async fn register(
        provider: &dyn EmbeddingProvider,
        entries: &[(String, &str)],
    ) -> Result<Self, RetrievalError> {
        let mut ids = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());

        for batch in entries.chunks(BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|(_, text)| *text).collect();
            let embedded = provider.embed_batch(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(RetrievalError::Mismatch {
                    expected: texts.len(),
                    got: embedded.len(),
                });
            }
            ids.extend(batch.iter().map(|(id, _)| id.clone()));
            vectors.extend(embedded);
        }

        debug!(provider = provider.name(), chunks = ids.len(), "chunks registered");
        Ok(Self { ids, vectors })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Top `k` `(chunk_id, similarity)` pairs, best first.
    pub async fn query(
        &self,
        provider: &dyn EmbeddingProvider,
        text: &str,
        k: usize,
    ) -> Result<Vec<(String, f32)>, RetrievalError> {
        let mut embedded = provider.embed_batch(&[text]).await?;
        let query = embedded.pop().ok_or(RetrievalError::Mismatch {
            expected: 1,
            got: 0,
        })?;

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(v, &query)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| (self.ids[i].clone(), score))
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Embeds text as counts of a few fixed keywords; can be told to fail.
    #[derive(Default)]
    pub struct FakeEmbeddings {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    const AXES: &[&str] = &["bail", "parole", "jail", "crime"];

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddings {
        fn name(&self) -> &str {
            "fake"
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RetrievalError::Unavailable {
                    provider: "fake".into(),
                    message: "offline".into(),
                });
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    AXES.iter()
                        .map(|axis| lower.matches(axis).count() as f32)
                        .collect()
                })
                .collect())
        }
    }
}
