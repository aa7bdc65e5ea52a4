use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use tracing::debug;

use kbase_core::error::SourceError;
use kbase_core::registry::DimensionHandle;
use kbase_core::traits::VectorCandidateSource;
use kbase_core::types::{Meta, MetadataFilter, ScoredChunk};

use crate::table::{open_db, quote_literal};

/// Nearest-neighbor lookup over the per-dimension LanceDB partitions.
///
/// The partition is picked by the caller's `DimensionHandle`; the length
/// guard below is the last line of defense against a query vector being
/// compared to a store column sized for a different dimension.
pub struct LanceVectorSource {
	db: Connection,
}

impl LanceVectorSource {
	pub async fn new(db_uri: &str) -> anyhow::Result<Self> {
		Ok(Self { db: open_db(db_uri).await? })
	}

	pub fn from_connection(db: Connection) -> Self {
		Self { db }
	}
}

fn column<'a, T: 'static>(batch: &'a arrow_array::RecordBatch, name: &str) -> Result<&'a T, SourceError> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<T>())
		.ok_or_else(|| SourceError::Backend(anyhow::anyhow!("column {name} missing or mistyped")))
}

#[async_trait]
impl VectorCandidateSource for LanceVectorSource {
	async fn fetch(
		&self,
		handle: &DimensionHandle,
		query_vector: &[f32],
		filter: &MetadataFilter,
		source_scope: Option<&str>,
		limit: usize,
	) -> Result<Vec<ScoredChunk>, SourceError> {
		// Guard before any remote call: a vector must only ever be compared
		// against the partition sized for it.
		if query_vector.len() != handle.dimension() {
			return Err(SourceError::UnsupportedDimension(query_vector.len()));
		}
		if limit == 0 {
			return Ok(Vec::new());
		}

		let table = self
			.db
			.open_table(handle.locator().table())
			.execute()
			.await
			.map_err(|e| SourceError::Unavailable(format!("open {}: {e}", handle.locator().table())))?;

		let fetch_limit = if filter.is_empty() { limit } else { limit.saturating_mul(3) };
		let mut query = table
			.vector_search(query_vector.to_vec())
			.map_err(|e| SourceError::Backend(e.into()))?
			.distance_type(DistanceType::Cosine)
			.limit(fetch_limit);
		if let Some(scope) = source_scope {
			query = query.only_if(format!("source_id = {}", quote_literal(scope)));
		}
		let mut stream = query
			.execute()
			.await
			.map_err(|e| SourceError::Unavailable(format!("vector search: {e}")))?;

		let mut hits = Vec::new();
		while let Some(batch) = stream
			.try_next()
			.await
			.map_err(|e| SourceError::Unavailable(format!("vector stream: {e}")))?
		{
			let ids = column::<arrow_array::StringArray>(&batch, "id")?;
			let distances = column::<arrow_array::Float32Array>(&batch, "_distance")?;
			let metadata = column::<arrow_array::StringArray>(&batch, "metadata")?;
			for i in 0..batch.num_rows() {
				if !filter.is_empty() {
					let meta: Meta = serde_json::from_str(metadata.value(i)).unwrap_or_default();
					if !filter.matches(&meta) {
						continue;
					}
				}
				// Cosine distance to similarity; clamp keeps float noise inside [0,1].
				let similarity = (1.0 - distances.value(i)).clamp(0.0, 1.0);
				hits.push(ScoredChunk { chunk_id: ids.value(i).to_string(), score: similarity });
				if hits.len() == limit {
					break;
				}
			}
			if hits.len() == limit {
				break;
			}
		}
		debug!(dimension = handle.dimension(), hits = hits.len(), "vector search");
		Ok(hits)
	}
}
