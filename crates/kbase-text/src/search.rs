use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::{Index, TantivyDocument};
use tracing::debug;

use kbase_core::error::SourceError;
use kbase_core::traits::LexicalCandidateSource;
use kbase_core::types::{Meta, MetadataFilter, ScoredChunk};

use crate::tantivy_utils::register_tokenizer;

/// BM25-ranked lexical lookup over the Tantivy chunk index.
///
/// Rank scores are Tantivy's BM25 values: opaque, non-negative, and on
/// their own scale. Normalization onto the vector scale happens in the
/// fusion stage, never here.
pub struct TantivyLexicalSource {
	index: Index,
	id_field: tantivy::schema::Field,
	source_id_field: tantivy::schema::Field,
	content_field: tantivy::schema::Field,
	metadata_field: tantivy::schema::Field,
}

impl TantivyLexicalSource {
	pub fn open(index_dir: std::path::PathBuf) -> anyhow::Result<Self> {
		let index = Index::open_in_dir(&index_dir)?;
		register_tokenizer(&index);
		let schema = index.schema();
		let id_field = schema.get_field("id")?;
		let source_id_field = schema.get_field("source_id")?;
		let content_field = schema.get_field("content")?;
		let metadata_field = schema.get_field("metadata")?;
		Ok(Self { index, id_field, source_id_field, content_field, metadata_field })
	}
}

#[async_trait]
impl LexicalCandidateSource for TantivyLexicalSource {
	async fn fetch(
		&self,
		query_text: &str,
		filter: &MetadataFilter,
		source_scope: Option<&str>,
		limit: usize,
	) -> Result<Vec<ScoredChunk>, SourceError> {
		if limit == 0 || query_text.trim().is_empty() {
			return Ok(Vec::new());
		}

		let reader = self
			.index
			.reader()
			.map_err(|e| SourceError::Unavailable(format!("lexical index reader: {e}")))?;
		let searcher = reader.searcher();
		let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
		// Lenient parse: stray syntax in user text degrades to the terms
		// that did parse instead of failing the whole source.
		let (query, parse_errors) = query_parser.parse_query_lenient(query_text);
		if !parse_errors.is_empty() {
			debug!(?parse_errors, "lexical query parsed leniently");
		}

		// Over-fetch when post-filtering so enough candidates survive.
		let needs_post_filter = !filter.is_empty() || source_scope.is_some();
		let fetch_limit = if needs_post_filter { limit.saturating_mul(3) } else { limit };
		let top_docs = searcher
			.search(&query, &TopDocs::with_limit(fetch_limit))
			.map_err(|e| SourceError::Unavailable(format!("lexical search: {e}")))?;

		let mut hits = Vec::new();
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher
				.doc(addr)
				.map_err(|e| SourceError::Unavailable(format!("lexical doc fetch: {e}")))?;
			let id = doc
				.get_first(self.id_field)
				.and_then(|v| v.as_str())
				.unwrap_or("")
				.to_string();
			if id.is_empty() {
				continue;
			}
			if let Some(scope) = source_scope {
				let source_id = doc.get_first(self.source_id_field).and_then(|v| v.as_str());
				if source_id != Some(scope) {
					continue;
				}
			}
			if !filter.is_empty() {
				let metadata: Meta = doc
					.get_first(self.metadata_field)
					.and_then(|v| v.as_str())
					.and_then(|s| serde_json::from_str(s).ok())
					.unwrap_or_default();
				if !filter.matches(&metadata) {
					continue;
				}
			}
			hits.push(ScoredChunk { chunk_id: id, score });
			if hits.len() == limit {
				break;
			}
		}
		debug!(query = query_text, hits = hits.len(), "lexical search");
		Ok(hits)
	}
}
