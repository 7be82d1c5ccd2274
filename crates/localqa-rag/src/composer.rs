//! Turns retrieved chunks into a bounded prompt and a sourced answer.

use localqa_core::config::ComposerSettings;
use localqa_core::{CallOptions, GenerationConfig, GenerationRequest, QAResponse, Result, RetrievalResult};
use localqa_models::GenerationProvider;

/// The grounding block handed to the generator and what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedContext {
    pub text: String,
    /// Distinct origins of the included chunks, first-seen order.
    pub sources: Vec<String>,
    pub included: usize,
    pub best_score: Option<f32>,
}

/// Packs chunks best-first into at most `max_chars` characters.
///
/// A chunk that would overflow the bound ends the context. The best chunk is
/// always included, cut to the bound if it alone is too long.
pub fn build_context(retrieved: &RetrievalResult, max_chars: usize, max_chunk_chars: Option<usize>) -> ComposedContext {
    let mut text = String::new();
    let mut used = 0usize;
    let mut sources: Vec<String> = Vec::new();
    let mut included = 0usize;

    for hit in retrieved.hits() {
        let body = match max_chunk_chars {
            Some(limit) => truncate_with_ellipsis(&hit.chunk.text, limit),
            None => hit.chunk.text.clone(),
        };
        let block = format!("[Source {}: {}]\n{}", included + 1, hit.source, body);
        let separator = if included == 0 { 0 } else { 2 };
        let block_chars = block.chars().count();

        if used + separator + block_chars > max_chars {
            if included == 0 {
                text = block.chars().take(max_chars).collect();
                included = 1;
                sources.push(hit.source.clone());
            }
            break;
        }
        if separator > 0 {
            text.push_str("\n\n");
        }
        text.push_str(&block);
        used += separator + block_chars;
        included += 1;
        if !sources.contains(&hit.source) {
            sources.push(hit.source.clone());
        }
    }

    ComposedContext {
        text,
        sources,
        included,
        best_score: retrieved.hits().first().filter(|_| included > 0).map(|h| h.score),
    }
}

fn truncate_with_ellipsis(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!("CONTEXT:\n{context}\n\nQUESTION: {question}")
}

pub struct AnswerComposer {
    generation: GenerationProvider,
    settings: ComposerSettings,
    system_prompt: String,
}

impl AnswerComposer {
    pub fn new(generation: GenerationProvider, settings: ComposerSettings, system_prompt: impl Into<String>) -> Self {
        Self { generation, settings, system_prompt: system_prompt.into() }
    }

    /// The reply used whenever there is nothing to ground an answer on.
    pub fn no_context_response(&self) -> QAResponse {
        QAResponse::ungrounded(self.settings.no_context_answer.clone())
    }

    pub async fn answer(
        &self,
        question: &str,
        retrieved: &RetrievalResult,
        config: &GenerationConfig,
        opts: &CallOptions,
    ) -> Result<QAResponse> {
        let context = build_context(retrieved, self.settings.max_context_chars, self.settings.max_chunk_chars);
        if context.included == 0 {
            return Ok(self.no_context_response());
        }

        let request = GenerationRequest {
            system: self.system_prompt.clone(),
            prompt: build_prompt(&context.text, question),
            config: config.clone(),
        };
        let answer = self.generation.generate(&request, opts).await?;
        tracing::debug!(
            chunks = context.included,
            context_chars = context.text.chars().count(),
            sources = context.sources.len(),
            "composed answer"
        );
        Ok(QAResponse {
            answer,
            sources: context.sources,
            grounded: true,
            confidence: context.best_score,
        })
    }
}
