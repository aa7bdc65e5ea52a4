use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Connection;
use std::collections::BTreeMap;

use kbase_core::error::SourceError;
use kbase_core::traits::ChunkStore;
use kbase_core::types::{ChunkId, KnowledgeChunk, Meta};

use crate::table::{open_db, quote_literal, CHUNKS_TABLE};

/// Hydrates chunk payloads from the shared `chunks` table. Embedding maps
/// are left empty: client-facing results carry content and metadata, not
/// raw vectors.
pub struct LanceChunkStore {
	db: Connection,
}

impl LanceChunkStore {
	pub async fn new(db_uri: &str) -> anyhow::Result<Self> {
		Ok(Self { db: open_db(db_uri).await? })
	}

	pub fn from_connection(db: Connection) -> Self {
		Self { db }
	}
}

#[async_trait]
impl ChunkStore for LanceChunkStore {
	async fn get_batch(&self, ids: &[ChunkId]) -> Result<Vec<KnowledgeChunk>, SourceError> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let table = self
			.db
			.open_table(CHUNKS_TABLE)
			.execute()
			.await
			.map_err(|e| SourceError::Unavailable(format!("open {CHUNKS_TABLE}: {e}")))?;

		let id_list = ids.iter().map(|id| quote_literal(id)).collect::<Vec<_>>().join(", ");
		let mut stream = table
			.query()
			.only_if(format!("id IN ({id_list})"))
			.limit(ids.len())
			.execute()
			.await
			.map_err(|e| SourceError::Unavailable(format!("chunk fetch: {e}")))?;

		let mut chunks = Vec::new();
		while let Some(batch) = stream
			.try_next()
			.await
			.map_err(|e| SourceError::Unavailable(format!("chunk stream: {e}")))?
		{
			let get = |name: &str| -> Result<&arrow_array::StringArray, SourceError> {
				batch
					.column_by_name(name)
					.and_then(|c| c.as_any().downcast_ref::<arrow_array::StringArray>())
					.ok_or_else(|| SourceError::Backend(anyhow::anyhow!("column {name} missing or mistyped")))
			};
			let id_col = get("id")?;
			let source_col = get("source_id")?;
			let url_col = get("url")?;
			let content_col = get("content")?;
			let metadata_col = get("metadata")?;
			let index_col = batch
				.column_by_name("chunk_index")
				.and_then(|c| c.as_any().downcast_ref::<arrow_array::Int32Array>())
				.ok_or_else(|| SourceError::Backend(anyhow::anyhow!("column chunk_index missing or mistyped")))?;

			for i in 0..batch.num_rows() {
				let metadata: Meta = serde_json::from_str(metadata_col.value(i)).unwrap_or_default();
				chunks.push(KnowledgeChunk {
					id: id_col.value(i).to_string(),
					source_id: source_col.value(i).to_string(),
					url: url_col.value(i).to_string(),
					chunk_index: index_col.value(i).max(0) as usize,
					content: content_col.value(i).to_string(),
					metadata,
					embeddings: BTreeMap::new(),
				});
			}
		}
		Ok(chunks)
	}
}
