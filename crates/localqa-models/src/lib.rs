//! Embedding and generation backends.
//!
//! `ollama` talks to a local Ollama server, `fake` provides deterministic
//! in-process stand-ins. Both sit behind the providers in `provider`, which
//! share one [`ModelGate`] to cap concurrent calls.

use std::sync::Arc;

use localqa_core::config::{ModelProvider, Settings};
use localqa_core::{Embedder, Generator};

pub mod fake;
pub mod gate;
pub mod ollama;
pub mod provider;

pub use fake::{FakeEmbedder, FakeGenerator};
pub use gate::ModelGate;
pub use ollama::{OllamaClient, OllamaEmbedder, OllamaGenerator};
pub use provider::{EmbeddingProvider, GenerationProvider};

pub fn embedder_from_settings(settings: &Settings) -> Arc<dyn Embedder> {
    let cfg = &settings.embedding;
    match cfg.provider {
        ModelProvider::Ollama => Arc::new(
            OllamaEmbedder::new(OllamaClient::new(cfg.base_url.clone()), cfg.model.clone())
                .with_timeout(cfg.timeout()),
        ),
        ModelProvider::Fake => {
            tracing::info!(dim = cfg.fake_dimension, "using fake embedder");
            Arc::new(FakeEmbedder::new(cfg.fake_dimension))
        }
    }
}

pub fn generator_from_settings(settings: &Settings) -> Arc<dyn Generator> {
    let cfg = &settings.generation;
    match cfg.provider {
        ModelProvider::Ollama => Arc::new(
            OllamaGenerator::new(OllamaClient::new(cfg.base_url.clone()), cfg.model.clone())
                .with_timeout(cfg.timeout()),
        ),
        ModelProvider::Fake => {
            tracing::info!("using fake generator");
            Arc::new(FakeGenerator::new())
        }
    }
}

/// Both providers, configured from settings and sharing one gate.
pub fn providers_from_settings(settings: &Settings) -> (EmbeddingProvider, GenerationProvider) {
    let gate = ModelGate::new(settings.models.max_concurrent_requests);
    let embedding = EmbeddingProvider::new(embedder_from_settings(settings), gate.clone())
        .with_batch_size(settings.embedding.batch_size)
        .with_timeout(settings.embedding.timeout())
        .with_dimension(settings.embedding.dimension);
    let generation = GenerationProvider::new(generator_from_settings(settings), gate)
        .with_timeout(settings.generation.timeout());
    (embedding, generation)
}
