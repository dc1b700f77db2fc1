//! Overlapping fixed-window chunking.
//!
//! Windows are measured in chars, not bytes, so every boundary is valid
//! UTF-8. Boundaries depend only on the text length and [`ChunkParams`].

use crate::error::ConfigError;

use super::KnowledgeDocument;

/// Validated window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkParams {
    size: usize,
    overlap: usize,
}

impl ChunkParams {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if size == 0 || overlap >= size {
            return Err(ConfigError::InvalidChunking { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.size - self.overlap
    }
}

/// A contiguous span of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the parent document in the corpus.
    pub doc_index: usize,
    pub doc_id: String,
    /// Position of this chunk within its document.
    pub index: usize,
    /// Start of the span, in chars.
    pub offset: usize,
    /// Length of the span, in chars.
    pub len: usize,
    pub text: String,
}

impl Chunk {
    /// Stable identifier used when registering with the embedding index.
    pub fn id(&self) -> String {
        format!("{}#{}", self.doc_id, self.index)
    }
}

/// Split `text` into windows of `params.size()` chars, each starting
/// `size - overlap` chars after the previous one. The last window may be
/// shorter. Empty text yields nothing.
pub fn chunk_text(text: &str, params: ChunkParams) -> Vec<(usize, String)> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + params.size).min(total);
        spans.push((start, chars[start..end].iter().collect()));
        if end == total {
            break;
        }
        start += params.step();
    }

    spans
}

pub fn chunk_document(doc: &KnowledgeDocument, doc_index: usize, params: ChunkParams) -> Vec<Chunk> {
    chunk_text(&doc.body, params)
        .into_iter()
        .enumerate()
        .map(|(index, (offset, text))| Chunk {
            doc_index,
            doc_id: doc.id.clone(),
            index,
            offset,
            len: text.chars().count(),
            text,
        })
        .collect()
}

/// Chunk every document, in corpus order.
pub fn chunk_corpus(docs: &[KnowledgeDocument], params: ChunkParams) -> Vec<Chunk> {
    docs.iter()
        .enumerate()
        .flat_map(|(i, doc)| chunk_document(doc, i, params))
        .collect()
}
