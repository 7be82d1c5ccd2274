use std::sync::Arc;

use localqa_core::{CallOptions, Error, Result, RetrievalResult};
use localqa_models::EmbeddingProvider;
use localqa_vector::VectorIndex;

/// Embeds a query and looks up its nearest chunks.
///
/// Every failure comes back as `Error::RetrievalFailed` around the cause.
pub struct Retriever {
    embeddings: EmbeddingProvider,
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(embeddings: EmbeddingProvider, index: Arc<VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    pub async fn retrieve(&self, query: &str, k: usize, opts: &CallOptions) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(Error::retrieval(Error::InvalidRequest("top_k must be at least 1".into())));
        }
        let vector = self.embeddings.embed_query(query, opts).await.map_err(Error::retrieval)?;
        let result = self.index.query(&vector, k).await.map_err(Error::retrieval)?;
        tracing::debug!(k, hits = result.len(), best = ?result.hits().first().map(|h| h.score), "retrieved");
        Ok(result)
    }
}
