//! Domain types shared by the loader, chunker, index and answer pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type DocumentId = String;

/// Formats the loader understands, selected by file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Text,
    Markdown,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("txt") => Ok(Self::Text),
            Some("md" | "markdown") => Ok(Self::Markdown),
            _ => Err(Error::UnsupportedFormat { path: path.to_path_buf() }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Markdown => "markdown",
        }
    }

}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Similarity metric a collection is built with; fixed for its lifetime.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cosine" => Some(Self::Cosine),
            "dot" => Some(Self::Dot),
            _ => None,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file read into normalized text.
///
/// `origin` is the stable source label used for attribution and for
/// re-ingestion (path relative to the ingestion root). `id` is derived from it,
/// so reloading the same origin yields the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub origin: String,
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub text: String,
    pub loaded_at: DateTime<Utc>,
}

/// Stable document identity for an origin label.
pub fn document_id(origin: &str) -> DocumentId {
    let hash = blake3::hash(origin.as_bytes()).to_hex();
    hash.as_str()[..16].to_string()
}

/// A bounded slice of a document's text.
///
/// `offset` and `length` count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub index: usize,
    pub offset: usize,
    pub length: usize,
}

impl Chunk {
    pub fn chunk_id(document_id: &str, index: usize) -> ChunkId {
        format!("{document_id}:{index}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
    pub model: String,
    pub dimension: usize,
}

/// Everything the index keeps about a chunk besides its vector and text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub source: String,
    pub full_path: String,
    pub document_id: DocumentId,
    pub format: DocumentFormat,
    pub chunk_index: usize,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: ChunkId,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    pub fn new(document: &SourceDocument, chunk: &Chunk, embedding: EmbeddingVector) -> Self {
        Self {
            id: chunk.id.clone(),
            vector: embedding.vector,
            text: chunk.text.clone(),
            metadata: EntryMetadata {
                source: document.origin.clone(),
                full_path: document.path.to_string_lossy().to_string(),
                document_id: document.id.clone(),
                format: document.format,
                chunk_index: chunk.index,
                offset: chunk.offset,
                length: chunk.length,
            },
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// A retrieved chunk with its similarity score; higher is better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub source: String,
    pub full_path: String,
    pub score: f32,
}

/// Hits in descending score order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    /// Sorts by descending score and keeps at most `k` hits.
    pub fn ranked(mut hits: Vec<ScoredChunk>, k: usize) -> Self {
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Self { hits }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> &[ScoredChunk] {
        &self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// What a health check found out about one configured model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Ready,
    /// The service answers but does not list the model.
    NotInstalled,
    Unreachable,
}

impl ModelStatus {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::NotInstalled => "not installed",
            Self::Unreachable => "unreachable",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QAResponse {
    pub answer: String,
    pub sources: Vec<String>,
    pub grounded: bool,
    pub confidence: Option<f32>,
}

impl QAResponse {
    pub fn ungrounded(answer: impl Into<String>) -> Self {
        Self { answer: answer.into(), sources: Vec::new(), grounded: false, confidence: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub entry_count: usize,
    pub collection_name: String,
    pub embedding_model: String,
    pub dimension: Option<usize>,
}

#[derive(Debug)]
pub struct IngestFailure {
    pub path: PathBuf,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub loaded_count: usize,
    pub chunk_count: usize,
    pub failures: Vec<IngestFailure>,
}

/// Sampling parameters handed to the generation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub num_ctx: Option<u32>,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { temperature: 0.2, num_ctx: Some(4096), max_tokens: None }
    }
}

/// A fully built prompt for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub config: GenerationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: id.into(),
                document_id: "d".into(),
                text: "t".into(),
                index: 0,
                offset: 0,
                length: 1,
            },
            source: "a.txt".into(),
            full_path: "/data/a.txt".into(),
            score,
        }
    }

    #[test]
    fn format_is_selected_by_extension_case_insensitively() {
        assert_eq!(DocumentFormat::from_path(Path::new("x/A.PDF")).ok(), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_path(Path::new("notes.md")).ok(), Some(DocumentFormat::Markdown));
        assert_eq!(DocumentFormat::from_path(Path::new("a.txt")).ok(), Some(DocumentFormat::Text));
        assert!(matches!(
            DocumentFormat::from_path(Path::new("a.docx")),
            Err(Error::UnsupportedFormat { .. })
        ));
        assert!(DocumentFormat::from_path(Path::new("README")).is_err());
    }

    #[test]
    fn document_id_is_stable_per_origin() {
        assert_eq!(document_id("a.txt"), document_id("a.txt"));
        assert_ne!(document_id("a.txt"), document_id("b.txt"));
        assert_eq!(document_id("a.txt").len(), 16);
    }

    #[test]
    fn ranked_sorts_descending_and_truncates() {
        let r = RetrievalResult::ranked(vec![hit("a", 0.1), hit("b", 0.9), hit("c", 0.5)], 2);
        let ids: Vec<_> = r.hits().iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
