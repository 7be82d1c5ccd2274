use std::fmt::Display;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use localqa_core::{Error, Result};

use crate::schema::build_meta_schema;

pub const META_TABLE: &str = localqa_core::config::META_TABLE_NAME;

/// Turns LanceDB/Arrow failures into `Error::Storage`.
pub trait StorageResultExt<T> {
    fn storage(self) -> Result<T>;
}

impl<T, E: Display> StorageResultExt<T> for std::result::Result<T, E> {
    fn storage(self) -> Result<T> {
        self.map_err(|e| Error::Storage(e.to_string()))
    }
}

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.storage()
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.storage()?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    conn.create_empty_table(name, schema).execute().await.storage()?;
    Ok(())
}

/// Quotes a string literal for a LanceDB filter expression.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub async fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    ensure_table(conn, META_TABLE, build_meta_schema()).await?;
    let t = conn.open_table(META_TABLE).execute().await.storage()?;
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .storage()?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    // key is unique: update in place or insert
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.storage()?;
    Ok(())
}

pub async fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    if !table_exists(conn, META_TABLE).await? {
        return Ok(None);
    }
    let t = conn.open_table(META_TABLE).execute().await.storage()?;
    let mut stream = t
        .query()
        .only_if(format!("key = {}", sql_literal(key)))
        .execute()
        .await
        .storage()?;
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await.storage()? {
        if batch.num_rows() == 0 {
            continue;
        }
        let val = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::Storage("meta.value column missing".into()))?;
        return Ok(Some(val.value(0).to_string()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(sql_literal("o'brien.txt"), "'o''brien.txt'");
    }

    #[tokio::test]
    async fn meta_values_upsert_by_key() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = open_db(&tmp.path().to_string_lossy()).await.unwrap();
        assert_eq!(get_meta(&conn, "collection:qa:model").await.unwrap(), None);

        set_meta(&conn, "collection:qa:model", "nomic-embed-text").await.unwrap();
        set_meta(&conn, "collection:qa:model", "all-minilm").await.unwrap();
        assert_eq!(get_meta(&conn, "collection:qa:model").await.unwrap().as_deref(), Some("all-minilm"));
    }
}
