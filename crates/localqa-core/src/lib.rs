//! Core types, configuration and text preparation for local document QA.
//!
//! Loads PDF, text and Markdown files, splits them into overlapping chunks and
//! defines the model traits the embedding and generation backends implement.
//! Settings come from Figment merging `config.toml` + `config.<env>.toml` +
//! `APP_*` env vars.

pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod telemetry;
pub mod traits;
pub mod types;

pub use chunker::{Chunker, ChunkingConfig};
pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use loader::DocumentLoader;
pub use traits::{CallOptions, Embedder, Generator};
pub use types::*;
