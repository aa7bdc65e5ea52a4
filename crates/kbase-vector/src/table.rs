use anyhow::Result;
use lancedb::{connect, Connection};

use arrow_array::RecordBatchIterator;
use std::sync::Arc;

/// Name of the shared chunk payload table.
pub const CHUNKS_TABLE: &str = "chunks";

/// Conventional name for a dimension bucket's partition table.
pub fn embeddings_table_name(dimension: usize) -> String {
    format!("embeddings_{dimension}")
}

pub async fn open_db(uri: &str) -> Result<Connection> {
    Ok(connect(uri).execute().await?)
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    let names = conn.table_names().execute().await?;
    if names.contains(&name.to_string()) {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await?;
    Ok(())
}

pub async fn ensure_chunks_table(conn: &Connection) -> Result<()> {
    ensure_table(conn, CHUNKS_TABLE, crate::schema::build_chunks_schema()).await
}

pub async fn ensure_embeddings_table(conn: &Connection, name: &str, dimension: usize) -> Result<()> {
    ensure_table(conn, name, crate::schema::build_embeddings_schema(dimension as i32)).await
}

/// Registered partitions discovered from the store: table names of the form
/// `embeddings_<dim>` paired with the parsed dimension.
pub async fn discover_partitions(conn: &Connection) -> Result<Vec<(usize, String)>> {
    let names = conn.table_names().execute().await?;
    let mut partitions = Vec::new();
    for name in names {
        if let Some(dim) = name.strip_prefix("embeddings_").and_then(|d| d.parse::<usize>().ok()) {
            partitions.push((dim, name));
        }
    }
    Ok(partitions)
}

/// Escape a value for use inside a single-quoted LanceDB predicate.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
