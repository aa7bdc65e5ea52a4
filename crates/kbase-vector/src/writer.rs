use anyhow::Result;
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use lancedb::Connection;
use std::sync::Arc;
use tracing::info;

use kbase_core::registry::DimensionHandle;
use kbase_core::types::KnowledgeChunk;

use crate::schema::{build_chunks_schema, build_embeddings_schema};
use crate::table::{ensure_chunks_table, ensure_embeddings_table, open_db, CHUNKS_TABLE};

/// Writes chunk payloads and per-dimension embedding rows. This is the
/// ingestion-side companion of the read-only retrieval path; rows are
/// upserted by chunk id so re-ingesting a source is idempotent.
pub struct LanceChunkWriter {
	db: Connection,
}

impl LanceChunkWriter {
	pub async fn new(db_uri: &str) -> Result<Self> {
		Ok(Self { db: open_db(db_uri).await? })
	}

	pub fn from_connection(db: Connection) -> Self {
		Self { db }
	}

	/// Upsert chunk payloads into the shared table.
	pub async fn write_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<usize> {
		if chunks.is_empty() { return Ok(0); }
		ensure_chunks_table(&self.db).await?;

		let schema = build_chunks_schema();
		let mut ids = Vec::new();
		let mut source_ids = Vec::new();
		let mut urls = Vec::new();
		let mut chunk_indices = Vec::new();
		let mut contents = Vec::new();
		let mut metadata = Vec::new();
		for c in chunks {
			ids.push(c.id.clone());
			source_ids.push(c.source_id.clone());
			urls.push(c.url.clone());
			chunk_indices.push(c.chunk_index as i32);
			contents.push(c.content.clone());
			metadata.push(serde_json::to_string(&c.metadata)?);
		}
		let rb = RecordBatch::try_new(schema.clone(), vec![
			Arc::new(StringArray::from(ids)),
			Arc::new(StringArray::from(source_ids)),
			Arc::new(StringArray::from(urls)),
			Arc::new(Int32Array::from(chunk_indices)),
			Arc::new(StringArray::from(contents)),
			Arc::new(StringArray::from(metadata)),
		])?;
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));

		let table = self.db.open_table(CHUNKS_TABLE).execute().await?;
		let mut mi = table.merge_insert(&["id"]);
		mi.when_matched_update_all(None).when_not_matched_insert_all();
		mi.execute(reader).await?;
		info!(count = chunks.len(), table = CHUNKS_TABLE, "wrote chunk payloads");
		Ok(chunks.len())
	}

	/// Upsert embedding rows for one dimension bucket. A chunk whose stored
	/// vector under this bucket does not have exactly the bucket's length is
	/// rejected, never written; chunks with no vector for this bucket are
	/// skipped.
	pub async fn write_embeddings(&self, handle: &DimensionHandle, chunks: &[KnowledgeChunk]) -> Result<usize> {
		let dimension = handle.dimension();
		let mut ids = Vec::new();
		let mut source_ids = Vec::new();
		let mut metadata = Vec::new();
		let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::new();
		for c in chunks {
			let Some(raw) = c.embeddings.get(&dimension) else { continue };
			if raw.len() != dimension {
				anyhow::bail!(
					"chunk {} has a {}-length vector in the {} bucket",
					c.id, raw.len(), dimension
				);
			}
			ids.push(c.id.clone());
			source_ids.push(c.source_id.clone());
			metadata.push(serde_json::to_string(&c.metadata)?);
			vectors.push(Some(raw.iter().map(|&x| Some(x)).collect()));
		}
		if ids.is_empty() { return Ok(0); }

		let written = ids.len();
		let table_name = handle.locator().table().to_string();
		ensure_embeddings_table(&self.db, &table_name, dimension).await?;

		let schema = build_embeddings_schema(dimension as i32);
		let rb = RecordBatch::try_new(schema.clone(), vec![
			Arc::new(StringArray::from(ids)),
			Arc::new(StringArray::from(source_ids)),
			Arc::new(StringArray::from(metadata)),
			Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors.into_iter(), dimension as i32)),
		])?;
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));

		let table = self.db.open_table(&table_name).execute().await?;
		let mut mi = table.merge_insert(&["id"]);
		mi.when_matched_update_all(None).when_not_matched_insert_all();
		mi.execute(reader).await?;
		info!(count = written, table = table_name, "wrote embedding rows");
		Ok(written)
	}
}
