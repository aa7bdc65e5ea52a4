use anyhow::Result;
use tantivy::{doc, Index};

use kbase_core::types::KnowledgeChunk;

use crate::tantivy_utils::{build_schema, register_tokenizer};

/// Writes knowledge chunks into the lexical index. Used by the external
/// ingestion pipeline and by integration tests; the retrieval engine
/// itself only reads.
pub struct TantivyChunkIndexer {
	index: Index,
	id_field: tantivy::schema::Field,
	source_id_field: tantivy::schema::Field,
	content_field: tantivy::schema::Field,
	metadata_field: tantivy::schema::Field,
}

impl TantivyChunkIndexer {
	/// Create a fresh index directory, wiping any previous contents.
	pub fn create(index_dir: std::path::PathBuf) -> Result<Self> {
		let schema = build_schema();
		if index_dir.exists() { std::fs::remove_dir_all(&index_dir)?; }
		std::fs::create_dir_all(&index_dir)?;
		let index = Index::create_in_dir(&index_dir, schema.clone())?;
		register_tokenizer(&index);
		let id_field = schema.get_field("id")?;
		let source_id_field = schema.get_field("source_id")?;
		let content_field = schema.get_field("content")?;
		let metadata_field = schema.get_field("metadata")?;
		Ok(Self { index, id_field, source_id_field, content_field, metadata_field })
	}

	pub fn index_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<()> {
		let mut index_writer = self.index.writer(50_000_000)?;
		for c in chunks {
			let metadata_json = serde_json::to_string(&c.metadata)?;
			let doc = doc!(
				self.id_field => c.id.clone(),
				self.source_id_field => c.source_id.clone(),
				self.content_field => c.content.clone(),
				self.metadata_field => metadata_json,
			);
			index_writer.add_document(doc)?;
		}
		index_writer.commit()?;
		Ok(())
	}
}
