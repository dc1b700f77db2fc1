pub mod chunker;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Document id of the remote README. Cannot collide with a file stem.
pub const README_ID: &str = "readme@remote";

/// One topic document of the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeDocument {
    /// Topic name (file stem).
    pub id: String,
    pub title: String,
    pub body: String,
    /// e.g. "knowledge/bail.md" or "url:https://..."
    pub source: String,
}

impl KnowledgeDocument {
    pub fn new(id: impl Into<String>, body: impl Into<String>, source: impl Into<String>) -> Self {
        let id = id.into();
        let body = body.into();
        let title = markdown_title(&body).unwrap_or_else(|| id.clone());
        Self {
            id,
            title,
            body,
            source: source.into(),
        }
    }
}

/// First level-one heading, if any.
fn markdown_title(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// An immutable, loaded set of documents. Reloads replace it wholesale.
///
/// Document ids are unique; chunk ids are derived from them.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    docs: Vec<KnowledgeDocument>,
    fingerprint: String,
}

impl Corpus {
    /// Later documents whose id is already taken are dropped.
    pub fn new(docs: Vec<KnowledgeDocument>) -> Self {
        let mut seen = HashSet::new();
        let docs: Vec<KnowledgeDocument> = docs
            .into_iter()
            .filter(|doc| {
                let fresh = seen.insert(doc.id.clone());
                if !fresh {
                    warn!(id = %doc.id, source = %doc.source, "duplicate document id, skipping");
                }
                fresh
            })
            .collect();

        let mut hasher = blake3::Hasher::new();
        for doc in &docs {
            hasher.update(doc.id.as_bytes());
            hasher.update(&[0]);
            hasher.update(doc.body.as_bytes());
            hasher.update(&[0]);
        }
        Self {
            docs,
            fingerprint: hasher.finalize().to_hex().to_string(),
        }
    }

    pub fn docs(&self) -> &[KnowledgeDocument] {
        &self.docs
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Content hash over ids and bodies, in load order.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Where the corpus comes from: a directory of markdown files, plus an
/// optional remote README.
pub struct CorpusSource {
    dir: PathBuf,
    readme_url: Option<String>,
    http: reqwest::Client,
    /// Last README that fetched successfully.
    readme_cache: Mutex<Option<KnowledgeDocument>>,
}

impl CorpusSource {
    pub fn new(dir: impl Into<PathBuf>, readme_url: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            dir: dir.into(),
            readme_url,
            http,
            readme_cache: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load(&self) -> Result<Corpus> {
        let mut docs = load_markdown_dir(&self.dir).await?;
        if let Some(readme) = self.fetch_readme().await {
            docs.push(readme);
        }
        info!(documents = docs.len(), dir = ?self.dir, "knowledge corpus loaded");
        Ok(Corpus::new(docs))
    }

    async fn fetch_readme(&self) -> Option<KnowledgeDocument> {
        let url = self.readme_url.as_deref()?;
        match fetch_text(&self.http, url).await {
            Ok(body) => {
                let doc = KnowledgeDocument::new(README_ID, body, format!("url:{}", url));
                *self.readme_cache.lock().await = Some(doc.clone());
                debug!(url, size = doc.body.len(), "README fetched");
                Some(doc)
            }
            Err(e) => {
                let cached = self.readme_cache.lock().await.clone();
                warn!(url, error = %e, cached = cached.is_some(), "README fetch failed");
                cached
            }
        }
    }
}

pub(crate) async fn fetch_text(http: &reqwest::Client, url: &str) -> Result<String> {
    let resp = http
        .get(url)
        .send()
        .await
        .context("Failed to fetch URL")?
        .error_for_status()
        .context("Request rejected")?;
    let body = resp.text().await.context("Failed to read response body")?;
    if body.trim().is_empty() {
        anyhow::bail!("Document at {} is empty", url);
    }
    Ok(body)
}

/// Read every `*.md` file in `dir`, sorted by file name. A missing directory
/// yields an empty list; unreadable or empty files are skipped.
pub async fn load_markdown_dir(dir: &Path) -> Result<Vec<KnowledgeDocument>> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        warn!(?dir, "knowledge path does not exist");
        return Ok(Vec::new());
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {:?}", dir))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("md") {
            paths.push(path);
        }
    }
    paths.sort();

    let reads = paths.iter().map(|p| tokio::fs::read_to_string(p));
    let contents = futures::future::join_all(reads).await;

    let mut docs = Vec::new();
    for (path, content) in paths.iter().zip(contents) {
        let body = match content {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) => continue,
            Err(e) => {
                debug!(?path, error = %e, "skipping unreadable document");
                continue;
            }
        };
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        docs.push(KnowledgeDocument::new(id, body, path.display().to_string()));
    }
    Ok(docs)
}
