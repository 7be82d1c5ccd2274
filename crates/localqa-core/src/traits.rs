use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{GenerationRequest, ModelStatus};

/// Turns text into fixed-dimension vectors.
///
/// Implementations return one vector per input, in input order, all of the
/// same dimension for a given `model_id`.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    /// Whether the backing service answers and has this model installed.
    async fn status(&self) -> ModelStatus {
        ModelStatus::Ready
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_id(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
    async fn status(&self) -> ModelStatus {
        ModelStatus::Ready
    }
}

/// Per-request controls for calls that reach the model service.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub cancel: CancellationToken,
    /// Overrides the configured wait bound for each external call.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout), ..Self::default() }
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel, ..Self::default() }
    }
}
