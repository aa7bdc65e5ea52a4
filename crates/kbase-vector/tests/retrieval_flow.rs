use std::collections::BTreeMap;

use kbase_core::error::SourceError;
use kbase_core::registry::{DimensionRegistry, StorageLocator};
use kbase_core::traits::{ChunkStore, VectorCandidateSource};
use kbase_core::types::{KnowledgeChunk, Meta, MetadataFilter};
use kbase_vector::table::embeddings_table_name;
use kbase_vector::{LanceChunkStore, LanceChunkWriter, LanceVectorSource};

const DIM: usize = 4;

fn chunk(id: &str, source_id: &str, content: &str, vector: [f32; DIM], meta: &[(&str, &str)]) -> KnowledgeChunk {
    let mut metadata = Meta::new();
    for (k, v) in meta {
        metadata.insert((*k).to_string(), (*v).to_string());
    }
    let mut embeddings = BTreeMap::new();
    embeddings.insert(DIM, vector.to_vec());
    KnowledgeChunk {
        id: id.to_string(),
        source_id: source_id.to_string(),
        url: format!("https://example.com/{id}"),
        chunk_index: 0,
        content: content.to_string(),
        metadata,
        embeddings,
    }
}

fn registry() -> DimensionRegistry {
    let registry = DimensionRegistry::new();
    registry
        .register(DIM, StorageLocator::new(embeddings_table_name(DIM)))
        .expect("register");
    registry
}

async fn seed(db_uri: &str) {
    let writer = LanceChunkWriter::new(db_uri).await.expect("writer");
    let handle = registry().resolve(DIM).expect("resolve");
    let chunks = vec![
        chunk("a", "docs", "exact match", [1.0, 0.0, 0.0, 0.0], &[("lang", "en")]),
        chunk("b", "docs", "orthogonal", [0.0, 1.0, 0.0, 0.0], &[("lang", "en")]),
        chunk("c", "blog", "close match", [0.9, 0.1, 0.0, 0.0], &[("lang", "fr")]),
    ];
    writer.write_chunks(&chunks).await.expect("write chunks");
    let written = writer.write_embeddings(&handle, &chunks).await.expect("write embeddings");
    assert_eq!(written, 3);
}

#[tokio::test]
async fn nearest_neighbors_ranked_by_similarity() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_uri = tmp.path().to_string_lossy().to_string();
    seed(&db_uri).await;

    let source = LanceVectorSource::new(&db_uri).await.expect("source");
    let handle = registry().resolve(DIM).expect("resolve");
    let hits = source
        .fetch(&handle, &[1.0, 0.0, 0.0, 0.0], &MetadataFilter::default(), None, 3)
        .await
        .expect("fetch");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].chunk_id, "a");
    assert_eq!(hits[1].chunk_id, "c");
    assert_eq!(hits[2].chunk_id, "b");
    for h in &hits {
        assert!((0.0..=1.0).contains(&h.score), "similarity in unit range, got {}", h.score);
    }
    assert!(hits[0].score > hits[1].score && hits[1].score > hits[2].score);
}

#[tokio::test]
async fn mismatched_query_vector_never_reaches_the_store() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_uri = tmp.path().to_string_lossy().to_string();
    // No seeding: the guard must fire before any table is touched.
    let source = LanceVectorSource::new(&db_uri).await.expect("source");
    let handle = registry().resolve(DIM).expect("resolve");

    match source
        .fetch(&handle, &[1.0, 0.0, 0.0], &MetadataFilter::default(), None, 3)
        .await
    {
        Err(SourceError::UnsupportedDimension(len)) => assert_eq!(len, 3),
        other => panic!("expected UnsupportedDimension, got {other:?}"),
    }
}

#[tokio::test]
async fn scope_and_metadata_filters_narrow_hits() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_uri = tmp.path().to_string_lossy().to_string();
    seed(&db_uri).await;

    let source = LanceVectorSource::new(&db_uri).await.expect("source");
    let handle = registry().resolve(DIM).expect("resolve");

    let hits = source
        .fetch(&handle, &[1.0, 0.0, 0.0, 0.0], &MetadataFilter::default(), Some("blog"), 3)
        .await
        .expect("fetch");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "c");

    let mut filter = MetadataFilter::default();
    filter.equals.insert("lang".to_string(), "en".to_string());
    let hits = source
        .fetch(&handle, &[1.0, 0.0, 0.0, 0.0], &filter, None, 3)
        .await
        .expect("fetch");
    let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert!(ids.contains(&"a") && ids.contains(&"b") && !ids.contains(&"c"));
}

#[tokio::test]
async fn chunk_store_hydrates_payloads() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_uri = tmp.path().to_string_lossy().to_string();
    seed(&db_uri).await;

    let store = LanceChunkStore::new(&db_uri).await.expect("store");
    let mut chunks = store
        .get_batch(&["a".to_string(), "c".to_string()])
        .await
        .expect("get_batch");
    chunks.sort_by(|x, y| x.id.cmp(&y.id));

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].id, "a");
    assert_eq!(chunks[0].content, "exact match");
    assert_eq!(chunks[0].metadata.get("lang").map(String::as_str), Some("en"));
    assert_eq!(chunks[1].id, "c");
    assert_eq!(chunks[1].url, "https://example.com/c");
}

#[tokio::test]
async fn malformed_bucket_vector_is_rejected_on_write() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_uri = tmp.path().to_string_lossy().to_string();
    let writer = LanceChunkWriter::new(&db_uri).await.expect("writer");
    let handle = registry().resolve(DIM).expect("resolve");

    let mut bad = chunk("x", "docs", "bad vector", [1.0, 0.0, 0.0, 0.0], &[]);
    bad.embeddings.insert(DIM, vec![1.0, 0.0]); // wrong length for the bucket

    assert!(writer.write_embeddings(&handle, &[bad]).await.is_err());
}
