use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::{env, path::PathBuf};

use anyhow::Context;

use kbase_core::config::Config;
use kbase_core::registry::{DimensionRegistry, StorageLocator};
use kbase_core::types::KnowledgeChunk;
use kbase_text::TantivyChunkIndexer;
use kbase_vector::table::embeddings_table_name;
use kbase_vector::LanceChunkWriter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let args: Vec<String> = env::args().skip(1).collect();
    let mut chunks_path = None;
    let mut skip_text = false;
    for arg in &args {
        match arg.as_str() {
            "--skip-text" | "-s" => skip_text = true,
            _ if !arg.starts_with('-') => chunks_path = Some(PathBuf::from(arg)),
            _ => {}
        }
    }
    let Some(chunks_path) = chunks_path else {
        eprintln!("Usage: kbase-indexer [--skip-text] <chunks.jsonl>");
        eprintln!("Each line is one JSON knowledge chunk with precomputed embeddings.");
        std::process::exit(1);
    };

    println!("Knowledge Base Indexer\n======================");
    println!("Chunk file: {}", chunks_path.display());
    let chunks = read_chunks(&chunks_path)?;
    println!("📊 Loaded {} chunks", chunks.len());

    if !skip_text {
        let text_index_dir: String = config
            .get("data.text_index_dir")
            .unwrap_or_else(|_| "./dev_data/indexes/text".to_string());
        let indexer = TantivyChunkIndexer::create(PathBuf::from(&text_index_dir))?;
        indexer.index_chunks(&chunks)?;
        println!("📊 Indexed {} chunks into the lexical index at {}", chunks.len(), text_index_dir);
    } else {
        println!("⚠️  Skipping lexical indexing (--skip-text flag)");
    }

    let db_uri: String = config
        .get("data.vector_db_dir")
        .unwrap_or_else(|_| "./dev_data/indexes/vectors".to_string());
    let writer = LanceChunkWriter::new(&db_uri).await?;
    writer.write_chunks(&chunks).await?;
    println!("📊 Wrote {} chunk payloads to {}", chunks.len(), db_uri);

    // One partition table per embedding dimension found in the input.
    let registry = DimensionRegistry::new();
    let dimensions: BTreeSet<usize> = chunks
        .iter()
        .flat_map(|c| c.embeddings.keys().copied())
        .collect();
    for dimension in dimensions {
        registry.register(dimension, StorageLocator::new(embeddings_table_name(dimension)))?;
        let handle = registry.resolve(dimension)?;
        let written = writer.write_embeddings(&handle, &chunks).await?;
        println!("📊 Wrote {} embedding rows into {}", written, handle.locator().table());
    }

    println!("\n✅ Indexing completed successfully!");
    println!("💡 To search, use: cargo run --bin kbase-search '<query>'");
    Ok(())
}

fn read_chunks(path: &PathBuf) -> anyhow::Result<Vec<KnowledgeChunk>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut chunks = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: KnowledgeChunk = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        chunks.push(chunk);
    }
    Ok(chunks)
}
