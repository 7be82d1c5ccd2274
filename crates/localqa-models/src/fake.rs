//! Deterministic in-process models for tests and offline runs.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use localqa_core::{Embedder, Error, GenerationRequest, Generator, ModelStatus, Result};
use twox_hash::XxHash64;

/// Hashed bag-of-words embeddings, L2-normalized.
///
/// Texts sharing words land close together, which is enough for retrieval
/// tests to rank the obvious document first.
pub struct FakeEmbedder {
    dim: usize,
    model: String,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            model: format!("fake-embed-d{dim}"),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// While unavailable every call fails with `EmbeddingUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `embed_batch` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in tokens(text).enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

/// Lowercased alphanumeric words; punctuation never splits a match.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable("fake embedder switched off".into()));
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn status(&self) -> ModelStatus {
        if self.available.load(Ordering::SeqCst) {
            ModelStatus::Ready
        } else {
            ModelStatus::Unreachable
        }
    }
}

/// Answers with the first context passage of the prompt (or a canned reply)
/// and remembers every request it was given.
pub struct FakeGenerator {
    model: String,
    reply: Option<String>,
    available: AtomicBool,
    prompts: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            model: "fake-chat".to_owned(),
            reply: None,
            available: AtomicBool::new(true),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self { reply: Some(reply.into()), ..Self::new() }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for FakeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.clone());
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::GenerationUnavailable("fake generator switched off".into()));
        }
        Ok(self.reply.clone().unwrap_or_else(|| extract_answer(&request.prompt)))
    }

    async fn status(&self) -> ModelStatus {
        if self.available.load(Ordering::SeqCst) {
            ModelStatus::Ready
        } else {
            ModelStatus::Unreachable
        }
    }
}

/// First line of passage text following a `[Source ...]` header.
fn extract_answer(prompt: &str) -> String {
    let mut lines = prompt.lines();
    while let Some(line) = lines.next() {
        if line.starts_with("[Source") {
            if let Some(text) = lines.next().map(str::trim).filter(|t| !t.is_empty()) {
                return text.to_owned();
            }
        }
    }
    "I don't know.".to_owned()
}
