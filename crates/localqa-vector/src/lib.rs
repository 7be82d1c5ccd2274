//! Persistent vector collections on LanceDB.
//!
//! A collection is one table plus three keys in the shared `meta` table
//! recording the embedding model, the similarity metric and the vector
//! dimension it was built with. They are written on the first upsert and
//! checked every time the collection is opened.

use std::path::Path;

use lancedb::{Connection, Table};
use localqa_core::{CollectionStats, DistanceMetric, Error, IndexEntry, Result, RetrievalResult};
use tokio::sync::RwLock;

pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

use table::{sql_literal, StorageResultExt};

/// What a collection is expected to be bound to when opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    pub name: String,
    pub embedding_model: String,
    pub metric: DistanceMetric,
    /// Known in advance only when configured; otherwise set by the first upsert.
    pub dimension: Option<usize>,
    pub upsert_batch_size: usize,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedding_model: embedding_model.into(),
            metric: DistanceMetric::Cosine,
            dimension: None,
            upsert_batch_size: 100,
        }
    }

    fn meta_key(&self, field: &str) -> String {
        format!("collection:{}:{}", self.name, field)
    }
}

#[derive(Default)]
struct CollectionState {
    table: Option<Table>,
    dimension: Option<usize>,
}

pub struct VectorIndex {
    conn: Connection,
    config: CollectionConfig,
    state: RwLock<CollectionState>,
}

impl VectorIndex {
    /// Opens (or prepares) the collection under `db_path`, validating its binding.
    pub async fn open(db_path: &Path, config: CollectionConfig) -> Result<Self> {
        if config.name == table::META_TABLE {
            return Err(Error::InvalidConfig(format!("collection name '{}' is reserved", config.name)));
        }
        tokio::fs::create_dir_all(db_path)
            .await
            .map_err(|e| Error::Storage(format!("cannot create index directory {}: {e}", db_path.display())))?;
        let conn = table::open_db(&db_path.to_string_lossy()).await?;

        if let Some(recorded) = table::get_meta(&conn, &config.meta_key("model")).await? {
            if recorded != config.embedding_model {
                return Err(Error::EmbeddingModelMismatch {
                    collection: config.name.clone(),
                    expected: recorded,
                    actual: config.embedding_model.clone(),
                });
            }
        }
        if let Some(recorded) = table::get_meta(&conn, &config.meta_key("metric")).await? {
            if DistanceMetric::parse(&recorded) != Some(config.metric) {
                return Err(Error::InvalidConfig(format!(
                    "collection '{}' uses the {recorded} metric, not {}",
                    config.name, config.metric
                )));
            }
        }

        let mut state = CollectionState::default();
        if table::table_exists(&conn, &config.name).await? {
            let t = conn.open_table(&config.name).execute().await.storage()?;
            let schema = t.schema().await.storage()?;
            state.dimension = schema::vector_dimension(&schema);
            state.table = Some(t);
        }
        if let Some(recorded) = table::get_meta(&conn, &config.meta_key("dimension")).await? {
            state.dimension = recorded.parse().ok().or(state.dimension);
        }
        if let (Some(expected), Some(actual)) = (state.dimension, config.dimension) {
            if expected != actual {
                return Err(Error::DimensionMismatch { expected, actual });
            }
        }

        tracing::info!(
            collection = %config.name,
            model = %config.embedding_model,
            metric = %config.metric,
            dimension = ?state.dimension,
            "opened vector collection"
        );
        Ok(Self { conn, config, state: RwLock::new(state) })
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Inserts or replaces entries by id; returns how many distinct ids were written.
    pub async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize> {
        let mut state = self.state.write().await;
        self.upsert_locked(&mut state, &entries.iter().collect::<Vec<_>>()).await
    }

    async fn upsert_locked(&self, state: &mut CollectionState, entries: &[&IndexEntry]) -> Result<usize> {
        let entries = writer::dedupe_last_wins(entries.iter().copied());
        let Some(first) = entries.first() else {
            return Ok(0);
        };
        let dimension = state.dimension.or(self.config.dimension).unwrap_or(first.dimension());
        writer::check_dimensions(&entries, dimension)?;

        let table = match &state.table {
            Some(t) => t.clone(),
            None => self.create_collection(dimension).await?,
        };
        let written = writer::merge_entries(&table, &entries, dimension, self.config.upsert_batch_size).await?;
        state.table = Some(table);
        state.dimension = Some(dimension);
        Ok(written)
    }

    /// Records the collection binding, then creates the empty table.
    async fn create_collection(&self, dimension: usize) -> Result<Table> {
        table::set_meta(&self.conn, &self.config.meta_key("model"), &self.config.embedding_model).await?;
        table::set_meta(&self.conn, &self.config.meta_key("metric"), self.config.metric.as_str()).await?;
        table::set_meta(&self.conn, &self.config.meta_key("dimension"), &dimension.to_string()).await?;
        table::ensure_table(&self.conn, &self.config.name, schema::build_entry_schema(dimension)).await?;
        tracing::info!(collection = %self.config.name, dimension, "created vector collection");
        self.conn.open_table(&self.config.name).execute().await.storage()
    }

    /// The `k` entries closest to `vector`, best first.
    pub async fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(Error::InvalidRequest("k must be at least 1".into()));
        }
        let state = self.state.read().await;
        let (Some(table), Some(dimension)) = (&state.table, state.dimension) else {
            return Err(Error::IndexEmpty(self.config.name.clone()));
        };
        let count = table.count_rows(None).await.storage()?;
        if count == 0 {
            return Err(Error::IndexEmpty(self.config.name.clone()));
        }
        if vector.len() != dimension {
            return Err(Error::DimensionMismatch { expected: dimension, actual: vector.len() });
        }
        let k = k.min(count);
        let hits = search::search_vec(table, vector, k, self.config.metric).await?;
        Ok(RetrievalResult::ranked(hits, k))
    }

    /// Removes every entry whose source is `source`; returns how many went away.
    pub async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let state = self.state.write().await;
        Self::delete_sources_locked(&state, &[source]).await
    }

    async fn delete_sources_locked(state: &CollectionState, sources: &[&str]) -> Result<usize> {
        let Some(table) = &state.table else {
            return Ok(0);
        };
        if sources.is_empty() {
            return Ok(0);
        }
        let literals: Vec<String> = sources.iter().map(|s| sql_literal(s)).collect();
        let predicate = format!("source IN ({})", literals.join(", "));
        let existing = table.count_rows(Some(predicate.clone())).await.storage()?;
        if existing > 0 {
            table.delete(&predicate).await.storage()?;
            tracing::debug!(sources = sources.len(), removed = existing, "deleted source entries");
        }
        Ok(existing)
    }

    /// Swaps all entries of `source` for `entries` without readers seeing a mix.
    pub async fn replace_source(&self, source: &str, entries: &[IndexEntry]) -> Result<usize> {
        self.replace_sources(&[(source, entries)]).await
    }

    /// [`replace_source`](Self::replace_source) for several sources under one write.
    pub async fn replace_sources(&self, batch: &[(&str, &[IndexEntry])]) -> Result<usize> {
        let mut state = self.state.write().await;
        for (source, entries) in batch {
            if let Some(e) = entries.iter().find(|e| e.metadata.source != *source) {
                return Err(Error::InvalidRequest(format!(
                    "entry '{}' belongs to '{}', not '{source}'",
                    e.id, e.metadata.source
                )));
            }
        }
        let all: Vec<&IndexEntry> = batch.iter().flat_map(|(_, entries)| entries.iter()).collect();
        if let Some(dimension) = state.dimension.or(self.config.dimension) {
            writer::check_dimensions(&all, dimension)?;
        }
        let sources: Vec<&str> = batch.iter().map(|(source, _)| *source).collect();
        Self::delete_sources_locked(&state, &sources).await?;
        self.upsert_locked(&mut state, &all).await
    }

    pub async fn count(&self) -> Result<usize> {
        let state = self.state.read().await;
        match &state.table {
            Some(t) => t.count_rows(None).await.storage(),
            None => Ok(0),
        }
    }

    pub async fn stats(&self) -> Result<CollectionStats> {
        let state = self.state.read().await;
        let entry_count = match &state.table {
            Some(t) => t.count_rows(None).await.storage()?,
            None => 0,
        };
        Ok(CollectionStats {
            entry_count,
            collection_name: self.config.name.clone(),
            embedding_model: self.config.embedding_model.clone(),
            dimension: state.dimension,
        })
    }
}
