use std::sync::Arc;
use std::time::Duration;

use localqa_core::{
    CallOptions, Chunk, Embedder, EmbeddingVector, Error, GenerationRequest, Generator, ModelStatus,
    Result,
};

use crate::gate::ModelGate;

/// Batches texts through an [`Embedder`] and checks what comes back.
///
/// Every returned vector set has one vector per input, in input order, all of
/// one dimension (the configured one when set).
#[derive(Clone)]
pub struct EmbeddingProvider {
    embedder: Arc<dyn Embedder>,
    gate: ModelGate,
    batch_size: usize,
    timeout: Duration,
    dimension: Option<usize>,
}

impl EmbeddingProvider {
    pub fn new(embedder: Arc<dyn Embedder>, gate: ModelGate) -> Self {
        Self { embedder, gate, batch_size: 32, timeout: Duration::from_secs(60), dimension: None }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub async fn embed(&self, texts: &[String], opts: &CallOptions) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        let mut observed: Option<usize> = None;
        for batch in texts.chunks(self.batch_size) {
            if opts.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let vectors = self
                .gate
                .run(opts, self.timeout, Error::EmbeddingTimeout, self.embedder.embed_batch(batch))
                .await?;
            if vectors.len() != batch.len() {
                return Err(Error::EmbeddingUnavailable(format!(
                    "model '{}' returned {} vectors for {} inputs",
                    self.model_id(),
                    vectors.len(),
                    batch.len()
                )));
            }
            for v in &vectors {
                if v.is_empty() || v.iter().any(|x| !x.is_finite()) {
                    return Err(Error::EmbeddingUnavailable(format!(
                        "model '{}' returned an empty or non-finite vector",
                        self.model_id()
                    )));
                }
                if let Some(expected) = self.dimension {
                    if expected != v.len() {
                        return Err(Error::DimensionMismatch { expected, actual: v.len() });
                    }
                }
                match observed {
                    Some(first) if first != v.len() => {
                        return Err(Error::EmbeddingUnavailable(format!(
                            "model '{}' returned inconsistent vector dimensions ({first} and {})",
                            self.model_id(),
                            v.len()
                        )));
                    }
                    Some(_) => {}
                    None => observed = Some(v.len()),
                }
            }
            out.extend(vectors);
        }
        tracing::debug!(model = self.model_id(), count = out.len(), "embedded texts");
        Ok(out)
    }

    pub async fn embed_chunks(&self, chunks: &[Chunk], opts: &CallOptions) -> Result<Vec<EmbeddingVector>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed(&texts, opts).await?;
        Ok(chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingVector {
                chunk_id: chunk.id.clone(),
                dimension: vector.len(),
                vector,
                model: self.model_id().to_owned(),
            })
            .collect())
    }

    pub async fn embed_query(&self, text: &str, opts: &CallOptions) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_owned()], opts).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("no vector returned for query".into()))
    }

    pub async fn status(&self) -> ModelStatus {
        self.embedder.status().await
    }
}

#[derive(Clone)]
pub struct GenerationProvider {
    generator: Arc<dyn Generator>,
    gate: ModelGate,
    timeout: Duration,
}

impl GenerationProvider {
    pub fn new(generator: Arc<dyn Generator>, gate: ModelGate) -> Self {
        Self { generator, gate, timeout: Duration::from_secs(120) }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_id(&self) -> &str {
        self.generator.model_id()
    }

    pub async fn generate(&self, request: &GenerationRequest, opts: &CallOptions) -> Result<String> {
        let text = self
            .gate
            .run(opts, self.timeout, Error::GenerationTimeout, self.generator.generate(request))
            .await?;
        Ok(text.trim().to_owned())
    }

    pub async fn status(&self) -> ModelStatus {
        self.generator.status().await
    }
}
