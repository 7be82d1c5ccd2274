use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use localqa_core::config::Settings;
use localqa_core::{
    CallOptions, Chunk, Chunker, CollectionStats, DocumentLoader, Error, IndexEntry, IngestFailure,
    IngestReport, ModelStatus, QAResponse, Result, SourceDocument,
};
use localqa_models::{providers_from_settings, EmbeddingProvider, GenerationProvider};
use localqa_vector::{CollectionConfig, VectorIndex};
use serde::{Deserialize, Serialize};

use crate::composer::AnswerComposer;
use crate::retriever::Retriever;

/// Whether the model service answers and has both configured models installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub embedding_model: String,
    pub embedding_status: ModelStatus,
    pub generation_model: String,
    pub generation_status: ModelStatus,
    pub collection: String,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.embedding_status.is_ready() && self.generation_status.is_ready()
    }
}

/// Collection binding derived from settings and the active embedding model.
pub fn collection_config(settings: &Settings, embedding_model: &str) -> CollectionConfig {
    CollectionConfig {
        name: settings.data.collection.clone(),
        embedding_model: embedding_model.to_owned(),
        metric: settings.embedding.metric,
        dimension: settings.embedding.dimension,
        upsert_batch_size: settings.index.upsert_batch_size,
    }
}

/// A loaded and chunked file waiting to be embedded.
struct PreparedDocument {
    path: PathBuf,
    document: SourceDocument,
    chunks: Vec<Chunk>,
}

/// Records a per-file failure, or hands back errors that end the run.
fn record_failure(report: &mut IngestReport, path: PathBuf, error: Error) -> Result<()> {
    if error.aborts_ingestion() {
        return Err(error);
    }
    tracing::warn!(path = %path.display(), error = %error, "skipping document");
    report.failures.push(IngestFailure { path, error });
    Ok(())
}

pub struct RagPipeline {
    settings: Settings,
    loader: DocumentLoader,
    chunker: Chunker,
    embeddings: EmbeddingProvider,
    generation: GenerationProvider,
    index: Arc<VectorIndex>,
    retriever: Retriever,
    composer: AnswerComposer,
}

impl RagPipeline {
    /// Builds every component from configuration and opens the collection.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let (embeddings, generation) = providers_from_settings(&settings);
        let config = collection_config(&settings, embeddings.model_id());
        let index = VectorIndex::open(&settings.data.index_dir, config).await?;
        Self::new(settings, embeddings, generation, Arc::new(index))
    }

    pub fn new(
        settings: Settings,
        embeddings: EmbeddingProvider,
        generation: GenerationProvider,
        index: Arc<VectorIndex>,
    ) -> Result<Self> {
        settings.validate()?;
        let chunker = Chunker::new(settings.chunking)?;
        let retriever = Retriever::new(embeddings.clone(), index.clone());
        let composer = AnswerComposer::new(
            generation.clone(),
            settings.composer.clone(),
            settings.generation.system_prompt.clone(),
        );
        Ok(Self {
            settings,
            loader: DocumentLoader::new(),
            chunker,
            embeddings,
            generation,
            index,
            retriever,
            composer,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Loads, chunks, embeds and indexes every supported file under `directory`.
    ///
    /// Each document replaces whatever its origin had in the collection before.
    /// Per-file load and embedding failures are collected in the report;
    /// failures no other file could get past end the run with an error.
    pub async fn ingest(&self, directory: &Path, opts: &CallOptions) -> Result<IngestReport> {
        let started = Instant::now();
        let files = self.loader.discover(directory)?;
        tracing::info!(directory = %directory.display(), files = files.len(), "ingesting");

        let progress = self.progress_bar(files.len() as u64);
        let root = directory.to_path_buf();
        let loader = self.loader;
        let chunker = self.chunker;
        let prepared = futures::stream::iter(files.into_iter().map(move |path| {
            let root = root.clone();
            async move {
                let task_path = path.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let document = loader.load_relative(&root, &task_path)?;
                    let chunks = chunker.split(&document);
                    Ok::<_, Error>((document, chunks))
                })
                .await;
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => Err(Error::load(&path, e)),
                };
                (path, outcome)
            }
        }))
        .buffered(self.settings.ingest.parallelism);

        let result = self.index_prepared(prepared, &progress, opts).await;
        match &result {
            Ok(report) => {
                progress.finish_with_message("done");
                tracing::info!(
                    loaded = report.loaded_count,
                    chunks = report.chunk_count,
                    failures = report.failures.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "ingestion finished"
                );
            }
            Err(Error::Cancelled) => progress.abandon_with_message("cancelled"),
            Err(e) => {
                tracing::error!(error = %e, "ingestion aborted");
                progress.abandon_with_message("aborted");
            }
        }
        result
    }

    /// Groups prepared documents until their chunks fill an embedding batch.
    async fn index_prepared(
        &self,
        prepared: impl Stream<Item = (PathBuf, Result<(SourceDocument, Vec<Chunk>)>)>,
        progress: &ProgressBar,
        opts: &CallOptions,
    ) -> Result<IngestReport> {
        let mut prepared = std::pin::pin!(prepared);
        let mut report = IngestReport::default();
        let mut pending: Vec<PreparedDocument> = Vec::new();
        let mut pending_chunks = 0usize;
        while let Some((path, outcome)) = prepared.next().await {
            if opts.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            progress.set_message(path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
            match outcome {
                Ok((document, chunks)) => {
                    pending_chunks += chunks.len();
                    pending.push(PreparedDocument { path, document, chunks });
                    if pending_chunks >= self.settings.embedding.batch_size {
                        pending_chunks = 0;
                        self.index_group(std::mem::take(&mut pending), &mut report, opts).await?;
                    }
                }
                Err(e) => record_failure(&mut report, path, e)?,
            }
            progress.inc(1);
        }
        self.index_group(pending, &mut report, opts).await?;
        Ok(report)
    }

    /// Embeds a group of documents in shared batches and writes them in one replace.
    ///
    /// When the shared embedding fails, each document is retried on its own so
    /// the failure is charged to the file that caused it.
    async fn index_group(
        &self,
        group: Vec<PreparedDocument>,
        report: &mut IngestReport,
        opts: &CallOptions,
    ) -> Result<()> {
        if group.len() > 1 {
            match self.embed_documents(&group, opts).await {
                Ok(entries) => return self.write_documents(&group, &entries, report).await,
                Err(e) if e.aborts_ingestion() => return Err(e),
                Err(e) => tracing::debug!(documents = group.len(), error = %e, "retrying documents one at a time"),
            }
        }
        for doc in group {
            let single = std::slice::from_ref(&doc);
            match self.embed_documents(single, opts).await {
                Ok(entries) => self.write_documents(single, &entries, report).await?,
                Err(e) => record_failure(report, doc.path, e)?,
            }
        }
        Ok(())
    }

    async fn embed_documents(&self, docs: &[PreparedDocument], opts: &CallOptions) -> Result<Vec<Vec<IndexEntry>>> {
        let chunks: Vec<Chunk> = docs.iter().flat_map(|d| d.chunks.iter().cloned()).collect();
        let mut embeddings = self.embeddings.embed_chunks(&chunks, opts).await?.into_iter();
        Ok(docs
            .iter()
            .map(|doc| {
                doc.chunks
                    .iter()
                    .zip(embeddings.by_ref())
                    .map(|(chunk, embedding)| IndexEntry::new(&doc.document, chunk, embedding))
                    .collect()
            })
            .collect())
    }

    async fn write_documents(
        &self,
        docs: &[PreparedDocument],
        entries: &[Vec<IndexEntry>],
        report: &mut IngestReport,
    ) -> Result<()> {
        let batch: Vec<(&str, &[IndexEntry])> =
            docs.iter().zip(entries).map(|(doc, e)| (doc.document.origin.as_str(), e.as_slice())).collect();
        let written = self.index.replace_sources(&batch).await?;
        for doc in docs {
            report.loaded_count += 1;
            report.chunk_count += doc.chunks.len();
        }
        tracing::debug!(documents = docs.len(), chunks = written, "indexed documents");
        Ok(())
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.settings.ingest.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }

    /// Answers `question` from the indexed documents.
    ///
    /// `top_k` defaults to the configured value. An empty collection yields an
    /// ungrounded "don't know" response rather than an error.
    pub async fn ask(&self, question: &str, top_k: Option<usize>, opts: &CallOptions) -> Result<QAResponse> {
        let started = Instant::now();
        let question = question.trim();
        let limits = self.settings.retrieval;
        if question.is_empty() {
            return Err(Error::InvalidRequest("question must not be empty".into()));
        }
        let chars = question.chars().count();
        if chars > limits.max_question_chars {
            return Err(Error::InvalidRequest(format!(
                "question is {chars} characters; the limit is {}",
                limits.max_question_chars
            )));
        }
        let k = top_k.unwrap_or(limits.top_k);
        if k == 0 || k > limits.max_top_k {
            return Err(Error::InvalidRequest(format!("top_k must be between 1 and {}", limits.max_top_k)));
        }

        let retrieved = match self.retriever.retrieve(question, k, opts).await {
            Ok(retrieved) => retrieved,
            Err(e) if matches!(e.root_cause(), Error::IndexEmpty(_)) => {
                tracing::info!(
                    collection = %self.settings.data.collection,
                    "no indexed documents; answering without context"
                );
                return Ok(self.composer.no_context_response());
            }
            Err(e) => return Err(e),
        };
        let config = self.settings.generation.generation_config();
        let response = self.composer.answer(question, &retrieved, &config, opts).await?;
        tracing::info!(
            k,
            hits = retrieved.len(),
            sources = response.sources.len(),
            grounded = response.grounded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered question"
        );
        Ok(response)
    }

    pub async fn collection_stats(&self) -> Result<CollectionStats> {
        self.index.stats().await
    }

    /// Removes a source's entries; returns how many were removed.
    pub async fn delete_source(&self, origin: &str) -> Result<usize> {
        self.index.delete_by_source(origin).await
    }

    pub async fn health(&self) -> HealthReport {
        let (embedding_status, generation_status) =
            tokio::join!(self.embeddings.status(), self.generation.status());
        HealthReport {
            embedding_model: self.embeddings.model_id().to_owned(),
            embedding_status,
            generation_model: self.generation.model_id().to_owned(),
            generation_status,
            collection: self.settings.data.collection.clone(),
        }
    }
}
