use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::Uncased,
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::{DistanceMetric, GenerationConfig};

/// Unprefixed variables accepted alongside `APP_*`, mapped onto settings keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("DATA_DIR", "data.data_dir"),
    ("INDEX_DIR", "data.index_dir"),
    ("COLLECTION", "data.collection"),
    ("EMBED_MODEL", "embedding.model"),
    ("LLM_MODEL", "generation.model"),
    ("TOP_K", "retrieval.top_k"),
];

/// Name of the shared table holding collection bindings; never a collection.
pub const META_TABLE_NAME: &str = "meta";

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment
            .merge(legacy_env())
            .merge(Env::prefixed("APP_").split("__"));

        Ok(Self::from_figment(figment))
    }

    /// Wraps already-merged user sources; defaults are layered underneath.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// Extracts, path-expands and validates the full settings tree.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        for (key, var) in [("embedding.model", "EMBED_MODEL"), ("generation.model", "LLM_MODEL")] {
            if self.figment.find_value(key).is_err() {
                tracing::warn!(key, "{var} not set; using default model name");
            }
        }

        let mut settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(self.figment.clone())
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to parse settings: {}", e))?;
        settings.data.data_dir = expand_path(settings.data.data_dir.to_string_lossy());
        settings.data.index_dir = expand_path(settings.data.index_dir.to_string_lossy());
        settings.validate()?;
        Ok(settings)
    }
}

fn legacy_env() -> Env {
    let names: Vec<&str> = LEGACY_ENV.iter().map(|(var, _)| *var).collect();
    Env::raw().only(&names).map(|key| {
        LEGACY_ENV
            .iter()
            .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
            .map(|(_, target)| Uncased::from(*target))
            .unwrap_or_else(|| Uncased::from(key.as_str().to_string()))
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub composer: ComposerSettings,
    #[serde(default)]
    pub models: ModelServiceSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub data_dir: PathBuf,
    pub index_dir: PathBuf,
    pub collection: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            index_dir: PathBuf::from("index"),
            collection: "qa_local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Ollama,
    /// Deterministic in-process models for tests and offline runs.
    Fake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ModelProvider,
    pub base_url: String,
    pub model: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    /// Expected vector size; checked against every response when set.
    pub dimension: Option<usize>,
    pub metric: DistanceMetric,
    pub fake_dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            batch_size: 32,
            timeout_secs: 60,
            dimension: None,
            metric: DistanceMetric::Cosine,
            fake_dimension: 384,
        }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a careful assistant. Answer the question using only the \
provided context. If the context does not contain the answer, say that you don't know. \
Cite the sources you used by their [source] labels.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub provider: ModelProvider,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub num_ctx: Option<u32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "koesn/mistral-7b-instruct".to_string(),
            temperature: 0.2,
            num_ctx: Some(4096),
            max_tokens: None,
            timeout_secs: 120,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl GenerationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            num_ctx: self.num_ctx,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub max_top_k: usize,
    pub max_question_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 4, max_top_k: 10, max_question_chars: 500 }
    }
}

pub const DEFAULT_NO_CONTEXT_ANSWER: &str =
    "I don't know. No indexed documents are available to answer this question.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerSettings {
    /// Upper bound on the context block handed to the generator.
    pub max_context_chars: usize,
    /// Per-chunk cap applied before the context bound.
    pub max_chunk_chars: Option<usize>,
    pub no_context_answer: String,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            max_context_chars: 6000,
            max_chunk_chars: None,
            no_context_answer: DEFAULT_NO_CONTEXT_ANSWER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServiceSettings {
    /// Shared cap on in-flight embedding and generation calls.
    pub max_concurrent_requests: usize,
}

impl Default for ModelServiceSettings {
    fn default() -> Self {
        Self { max_concurrent_requests: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub upsert_batch_size: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { upsert_batch_size: 100 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub parallelism: usize,
    pub progress: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { parallelism: 4, progress: true }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        let collection = &self.data.collection;
        if collection.is_empty()
            || !collection.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid(format!(
                "collection name '{collection}' must be non-empty and use only letters, digits, '_' or '-'"
            )));
        }
        if collection == META_TABLE_NAME {
            return Err(invalid(format!("collection name '{collection}' is reserved")));
        }

        for (name, url) in [
            ("embedding.base_url", &self.embedding.base_url),
            ("generation.base_url", &self.generation.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(format!("{name} must be an http(s) URL, got '{url}'")));
            }
        }
        for (name, model) in [
            ("embedding.model", &self.embedding.model),
            ("generation.model", &self.generation.model),
        ] {
            if model.trim().is_empty() {
                return Err(invalid(format!("{name} must not be empty")));
            }
        }

        let positive = [
            ("embedding.batch_size", self.embedding.batch_size),
            ("embedding.timeout_secs", self.embedding.timeout_secs as usize),
            ("embedding.fake_dimension", self.embedding.fake_dimension),
            ("generation.timeout_secs", self.generation.timeout_secs as usize),
            ("retrieval.top_k", self.retrieval.top_k),
            ("retrieval.max_top_k", self.retrieval.max_top_k),
            ("retrieval.max_question_chars", self.retrieval.max_question_chars),
            ("composer.max_context_chars", self.composer.max_context_chars),
            ("models.max_concurrent_requests", self.models.max_concurrent_requests),
            ("index.upsert_batch_size", self.index.upsert_batch_size),
            ("ingest.parallelism", self.ingest.parallelism),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(format!("{name} must be positive")));
        }
        if self.embedding.dimension == Some(0) {
            return Err(invalid("embedding.dimension must be positive".into()));
        }
        if self.composer.max_chunk_chars == Some(0) {
            return Err(invalid("composer.max_chunk_chars must be positive".into()));
        }
        if self.retrieval.top_k > self.retrieval.max_top_k {
            return Err(invalid(format!(
                "retrieval.top_k ({}) exceeds retrieval.max_top_k ({})",
                self.retrieval.top_k, self.retrieval.max_top_k
            )));
        }
        if !self.generation.temperature.is_finite() || self.generation.temperature < 0.0 {
            return Err(invalid("generation.temperature must be a non-negative number".into()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidConfig(message)
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
