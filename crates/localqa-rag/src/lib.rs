//! Retrieval-augmented question answering over local documents.
//!
//! [`RagPipeline`] wires the loader, chunker, embedding provider, vector index,
//! retriever and answer composer together behind `ingest`, `ask`,
//! `collection_stats` and `health`.

pub mod composer;
pub mod pipeline;
pub mod retriever;

pub use composer::{AnswerComposer, ComposedContext};
pub use pipeline::{HealthReport, RagPipeline};
pub use retriever::Retriever;
