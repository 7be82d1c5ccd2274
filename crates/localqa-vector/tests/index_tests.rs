use std::sync::Arc;

use localqa_core::{DistanceMetric, DocumentFormat, EntryMetadata, Error, IndexEntry};
use localqa_vector::{CollectionConfig, VectorIndex};

fn unit(dim: usize, hot: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[hot % dim] = 1.0;
    v
}

fn entry(source: &str, index: usize, text: &str, vector: Vec<f32>) -> IndexEntry {
    IndexEntry {
        id: format!("{source}:{index}"),
        vector,
        text: text.into(),
        metadata: EntryMetadata {
            source: source.into(),
            full_path: format!("/data/{source}"),
            document_id: source.into(),
            format: DocumentFormat::Text,
            chunk_index: index,
            offset: index * 10,
            length: text.chars().count(),
        },
    }
}

fn config() -> CollectionConfig {
    CollectionConfig::new("qa_test", "fake-embed-d4")
}

#[tokio::test]
async fn query_on_fresh_collection_is_index_empty() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = VectorIndex::open(tmp.path(), config()).await?;
    let err = index.query(&unit(4, 0), 3).await.unwrap_err();
    assert!(matches!(err, Error::IndexEmpty(name) if name == "qa_test"));
    assert_eq!(index.stats().await?.entry_count, 0);
    Ok(())
}

#[tokio::test]
async fn upsert_counts_distinct_ids_and_replaces_by_id() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = VectorIndex::open(tmp.path(), config()).await?;

    let written = index
        .upsert(&[
            entry("a.txt", 0, "first", unit(4, 0)),
            entry("b.txt", 0, "second", unit(4, 1)),
            entry("a.txt", 0, "first again", unit(4, 0)),
        ])
        .await?;
    assert_eq!(written, 2);
    assert_eq!(index.count().await?, 2);

    index.upsert(&[entry("a.txt", 0, "rewritten", unit(4, 0))]).await?;
    assert_eq!(index.count().await?, 2, "same id never duplicates");

    let top = index.query(&unit(4, 0), 1).await?;
    assert_eq!(top.hits()[0].chunk.text, "rewritten");
    Ok(())
}

#[tokio::test]
async fn query_ranks_descending_and_clamps_k() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = VectorIndex::open(tmp.path(), config()).await?;
    index
        .upsert(&[
            entry("a.txt", 0, "north", vec![1.0, 0.0, 0.0, 0.0]),
            entry("b.txt", 0, "north-east", vec![0.7, 0.7, 0.0, 0.0]),
            entry("c.txt", 0, "east", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .await?;

    let result = index.query(&[1.0, 0.0, 0.0, 0.0], 10).await?;
    assert_eq!(result.len(), 3, "k larger than the collection is clamped");
    let sources: Vec<_> = result.hits().iter().map(|h| h.source.as_str()).collect();
    assert_eq!(sources, vec!["a.txt", "b.txt", "c.txt"]);
    assert!(result.hits().windows(2).all(|w| w[0].score >= w[1].score));
    assert!((result.hits()[0].score - 1.0).abs() < 1e-4);
    assert_eq!(result.hits()[0].full_path, "/data/a.txt");

    assert!(matches!(index.query(&unit(4, 0), 0).await, Err(Error::InvalidRequest(_))));
    Ok(())
}

#[tokio::test]
async fn wrong_dimensions_are_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = VectorIndex::open(tmp.path(), config()).await?;
    index.upsert(&[entry("a.txt", 0, "a", unit(4, 0))]).await?;

    let err = index.upsert(&[entry("b.txt", 0, "b", unit(5, 0))]).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 5 }));
    assert_eq!(index.count().await?, 1, "nothing written on mismatch");

    let err = index.query(&unit(3, 0), 1).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 3 }));
    Ok(())
}

#[tokio::test]
async fn delete_and_replace_by_source() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = VectorIndex::open(tmp.path(), config()).await?;
    index
        .upsert(&[
            entry("a.txt", 0, "a0", unit(4, 0)),
            entry("a.txt", 1, "a1", unit(4, 1)),
            entry("o'neil.md", 0, "quoted", unit(4, 2)),
        ])
        .await?;

    assert_eq!(index.replace_source("a.txt", &[entry("a.txt", 0, "a0 v2", unit(4, 0))]).await?, 1);
    assert_eq!(index.count().await?, 2, "stale chunk a.txt:1 removed");

    assert_eq!(index.delete_by_source("o'neil.md").await?, 1);
    assert_eq!(index.delete_by_source("missing.txt").await?, 0);
    assert_eq!(index.count().await?, 1);

    let err = index.replace_source("a.txt", &[entry("b.txt", 0, "b", unit(4, 3))]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    Ok(())
}

#[tokio::test]
async fn reopen_keeps_entries_and_binding() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    {
        let index = VectorIndex::open(tmp.path(), config()).await?;
        index.upsert(&[entry("a.txt", 0, "persisted", unit(4, 0))]).await?;
    }

    let index = VectorIndex::open(tmp.path(), config()).await?;
    let stats = index.stats().await?;
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.dimension, Some(4));
    assert_eq!(stats.embedding_model, "fake-embed-d4");
    assert_eq!(stats.collection_name, "qa_test");

    let other_model = CollectionConfig::new("qa_test", "nomic-embed-text");
    let err = VectorIndex::open(tmp.path(), other_model).await.err();
    assert!(matches!(err, Some(Error::EmbeddingModelMismatch { .. })));

    let other_metric = CollectionConfig { metric: DistanceMetric::Dot, ..config() };
    assert!(matches!(VectorIndex::open(tmp.path(), other_metric).await.err(), Some(Error::InvalidConfig(_))));

    let other_dim = CollectionConfig { dimension: Some(8), ..config() };
    assert!(matches!(
        VectorIndex::open(tmp.path(), other_dim).await.err(),
        Some(Error::DimensionMismatch { expected: 4, actual: 8 })
    ));

    let separate = CollectionConfig::new("other", "nomic-embed-text");
    assert_eq!(VectorIndex::open(tmp.path(), separate).await?.count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn meta_is_not_a_collection_name() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let err = VectorIndex::open(tmp.path(), CollectionConfig::new("meta", "fake-embed-d4")).await.err();
    assert!(matches!(err, Some(Error::InvalidConfig(msg)) if msg.contains("reserved")));
    Ok(())
}

#[tokio::test]
async fn dot_metric_scores_by_inner_product() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = VectorIndex::open(tmp.path(), CollectionConfig { metric: DistanceMetric::Dot, ..config() }).await?;
    index
        .upsert(&[
            entry("long.txt", 0, "long", vec![2.0, 0.0, 0.0, 0.0]),
            entry("diag.txt", 0, "diagonal", vec![1.0, 1.0, 0.0, 0.0]),
            entry("east.txt", 0, "east", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .await?;

    let result = index.query(&[1.0, 0.0, 0.0, 0.0], 3).await?;
    let sources: Vec<_> = result.hits().iter().map(|h| h.source.as_str()).collect();
    assert_eq!(sources, vec!["long.txt", "diag.txt", "east.txt"], "magnitude counts under dot");
    let scores: Vec<f32> = result.hits().iter().map(|h| h.score).collect();
    assert!((scores[0] - scores[1] - 1.0).abs() < 1e-4, "{scores:?}");
    assert!((scores[1] - scores[2] - 1.0).abs() < 1e-4, "{scores:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readers_never_see_a_half_replaced_source() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = Arc::new(VectorIndex::open(tmp.path(), config()).await?);
    let version =
        |v: usize| -> Vec<IndexEntry> { (0..3).map(|i| entry("a.txt", i, &format!("v{v}"), unit(4, i))).collect() };
    index.upsert(&version(0)).await?;
    index.upsert(&[entry("b.txt", 0, "other", unit(4, 3))]).await?;

    let writer = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for v in 1..=10 {
                index.replace_source("a.txt", &version(v)).await?;
            }
            anyhow::Ok(())
        })
    };
    let reader = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for _ in 0..20 {
                let result = index.query(&unit(4, 0), 10).await?;
                let texts: Vec<&str> =
                    result.hits().iter().filter(|h| h.source == "a.txt").map(|h| h.chunk.text.as_str()).collect();
                assert_eq!(texts.len(), 3, "{texts:?}");
                assert!(texts.iter().all(|t| *t == texts[0]), "mixed versions: {texts:?}");
            }
            anyhow::Ok(())
        })
    };
    writer.await??;
    reader.await??;

    assert_eq!(index.count().await?, 4);
    let result = index.query(&unit(4, 0), 10).await?;
    assert!(result.hits().iter().filter(|h| h.source == "a.txt").all(|h| h.chunk.text == "v10"));
    Ok(())
}
