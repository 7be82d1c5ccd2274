//! Fixed-size, overlapping character windows over a document's text.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Chunk, SourceDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 800, overlap: 120 }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// A validated chunking policy.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split(&self, document: &SourceDocument) -> Vec<Chunk> {
        let text = document.text.as_str();
        if text.trim().is_empty() {
            return Vec::new();
        }
        // Byte offset of every char boundary, plus the end of the text.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let len = bounds.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.config.chunk_size).min(len);
            let index = chunks.len();
            chunks.push(Chunk {
                id: Chunk::chunk_id(&document.id, index),
                document_id: document.id.clone(),
                text: text[bounds[start]..bounds[end]].to_string(),
                index,
                offset: start,
                length: end - start,
            });
            if end >= len {
                break;
            }
            start += self.config.step();
        }
        chunks
    }
}

/// Splits `document` with a one-off policy.
pub fn split(document: &SourceDocument, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    Ok(Chunker::new(ChunkingConfig { chunk_size, overlap })?.split(document))
}
