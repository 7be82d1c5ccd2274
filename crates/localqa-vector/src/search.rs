use arrow_array::{Array, Float32Array, Int32Array, Int64Array, RecordBatch, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};
use localqa_core::{Chunk, DistanceMetric, Error, Result, ScoredChunk};

use crate::table::StorageResultExt;

pub fn distance_type(metric: DistanceMetric) -> DistanceType {
    match metric {
        DistanceMetric::Cosine => DistanceType::Cosine,
        DistanceMetric::Dot => DistanceType::Dot,
    }
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Storage(format!("column '{name}' missing or mistyped")))
}

/// Nearest `k` rows to `vector`; score is `1 - distance`, so higher is closer.
pub async fn search_vec(table: &Table, vector: &[f32], k: usize, metric: DistanceMetric) -> Result<Vec<ScoredChunk>> {
    let mut stream = table
        .vector_search(vector.to_vec())
        .storage()?
        .distance_type(distance_type(metric))
        .limit(k)
        .execute()
        .await
        .storage()?;
    let mut hits = Vec::with_capacity(k);
    while let Some(batch) = stream.try_next().await.storage()? {
        hits.extend(rows_to_hits(&batch)?);
    }
    Ok(hits)
}

pub fn rows_to_hits(batch: &RecordBatch) -> Result<Vec<ScoredChunk>> {
    let ids = column::<StringArray>(batch, "id")?;
    let document_ids = column::<StringArray>(batch, "document_id")?;
    let sources = column::<StringArray>(batch, "source")?;
    let full_paths = column::<StringArray>(batch, "full_path")?;
    let contents = column::<StringArray>(batch, "content")?;
    let chunk_indices = column::<Int32Array>(batch, "chunk_index")?;
    let offsets = column::<Int64Array>(batch, "char_offset")?;
    let lengths = column::<Int64Array>(batch, "char_length")?;
    let distances = column::<Float32Array>(batch, "_distance")?;

    let mut hits = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        hits.push(ScoredChunk {
            chunk: Chunk {
                id: ids.value(i).to_string(),
                document_id: document_ids.value(i).to_string(),
                text: contents.value(i).to_string(),
                index: usize::try_from(chunk_indices.value(i)).storage()?,
                offset: usize::try_from(offsets.value(i)).storage()?,
                length: usize::try_from(lengths.value(i)).storage()?,
            },
            source: sources.value(i).to_string(),
            full_path: full_paths.value(i).to_string(),
            score: 1.0 - distances.value(i),
        });
    }
    Ok(hits)
}
