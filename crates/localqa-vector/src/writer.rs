use arrow_array::types::Float32Type;
use arrow_array::{
    FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMillisecondArray,
};
use chrono::Utc;
use lancedb::Table;
use localqa_core::{Error, IndexEntry, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::build_entry_schema;
use crate::table::StorageResultExt;

/// Keeps the last entry for each id, in first-seen id order.
pub fn dedupe_last_wins<'a>(entries: impl IntoIterator<Item = &'a IndexEntry>) -> Vec<&'a IndexEntry> {
    let mut slot: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<&IndexEntry> = Vec::new();
    for entry in entries {
        match slot.get(entry.id.as_str()) {
            Some(&i) => out[i] = entry,
            None => {
                slot.insert(entry.id.as_str(), out.len());
                out.push(entry);
            }
        }
    }
    out
}

/// Fails with `DimensionMismatch` on the first vector that is not `dimension` wide.
pub fn check_dimensions(entries: &[&IndexEntry], dimension: usize) -> Result<()> {
    match entries.iter().find(|e| e.dimension() != dimension) {
        Some(e) => Err(Error::DimensionMismatch { expected: dimension, actual: e.dimension() }),
        None => Ok(()),
    }
}

pub fn entries_to_record_batch(entries: &[&IndexEntry], dimension: usize) -> Result<RecordBatch> {
    let schema = build_entry_schema(dimension);
    let now = Utc::now().timestamp_millis();
    let mut ids = Vec::with_capacity(entries.len());
    let mut document_ids = Vec::with_capacity(entries.len());
    let mut sources = Vec::with_capacity(entries.len());
    let mut full_paths = Vec::with_capacity(entries.len());
    let mut formats = Vec::with_capacity(entries.len());
    let mut contents = Vec::with_capacity(entries.len());
    let mut chunk_indices = Vec::with_capacity(entries.len());
    let mut offsets = Vec::with_capacity(entries.len());
    let mut lengths = Vec::with_capacity(entries.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(entries.len());
    for e in entries {
        let m = &e.metadata;
        ids.push(e.id.as_str());
        document_ids.push(m.document_id.as_str());
        sources.push(m.source.as_str());
        full_paths.push(m.full_path.as_str());
        formats.push(m.format.as_str());
        contents.push(e.text.as_str());
        chunk_indices.push(i32::try_from(m.chunk_index).storage()?);
        offsets.push(i64::try_from(m.offset).storage()?);
        lengths.push(i64::try_from(m.length).storage()?);
        vectors.push(Some(e.vector.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(schema, vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(document_ids)),
        Arc::new(StringArray::from(sources)),
        Arc::new(StringArray::from(full_paths)),
        Arc::new(StringArray::from(formats)),
        Arc::new(StringArray::from(contents)),
        Arc::new(Int32Array::from(chunk_indices)),
        Arc::new(Int64Array::from(offsets)),
        Arc::new(Int64Array::from(lengths)),
        Arc::new(TimestampMillisecondArray::from(vec![now; entries.len()])),
        Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dimension as i32)),
    ])
    .storage()
}

/// Merge-inserts `entries` by id in batches of `batch_size`.
pub async fn merge_entries(
    table: &Table,
    entries: &[&IndexEntry],
    dimension: usize,
    batch_size: usize,
) -> Result<usize> {
    let mut written = 0usize;
    for batch in entries.chunks(batch_size.max(1)) {
        let record_batch = entries_to_record_batch(batch, dimension)?;
        let schema = record_batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.storage()?;
        written += batch.len();
        tracing::debug!(written, total = entries.len(), "merged index batch");
    }
    Ok(written)
}
