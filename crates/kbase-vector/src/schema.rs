use arrow_schema::{Schema, Field, DataType};
use std::sync::Arc;

/// Payload table shared by all dimension buckets. One row per chunk.
pub fn build_chunks_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("source_id", DataType::Utf8, false),
		Field::new("url", DataType::Utf8, false),
		Field::new("chunk_index", DataType::Int32, false),
		Field::new("content", DataType::Utf8, false),
		Field::new("metadata", DataType::Utf8, false),
	]))
}

/// Per-dimension embedding partition. The vector width is a parameter, not
/// a constant: each registered dimension gets its own table sized for it.
pub fn build_embeddings_schema(dimension: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("source_id", DataType::Utf8, false),
		Field::new("metadata", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dimension), true),
	]))
}
