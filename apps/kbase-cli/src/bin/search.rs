use std::sync::Arc;
use std::{env, fs, path::PathBuf};

use kbase_core::config::Config;
use kbase_core::registry::{DimensionRegistry, StorageLocator};
use kbase_core::types::{Degradation, SearchQuery};
use kbase_hybrid::{HybridRetrievalCoordinator, RerankEngine, TermOverlapScorer};
use kbase_text::TantivyLexicalSource;
use kbase_vector::table::{discover_partitions, open_db};
use kbase_vector::{LanceChunkStore, LanceVectorSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let config = Config::load()?;
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <query> [--limit N] [--scope SOURCE_ID] [--filter key=value] [--rerank] [--embedding-file path.json]", args[0]);
        eprintln!("Example: {} 'solar panel wiring' --limit 5 --scope docs --rerank", args[0]);
        std::process::exit(1);
    }
    let query_text = &args[1];
    let mut limit = 10usize;
    let mut scope = None;
    let mut rerank = false;
    let mut embedding_file = None;
    let mut filters: Vec<(String, String)> = Vec::new();
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--limit" => {
                match args.get(i + 1).and_then(|v| v.parse::<usize>().ok()) {
                    Some(l) => { limit = l; i += 1; }
                    None => { eprintln!("Error: --limit requires a number"); std::process::exit(1); }
                }
            }
            "--scope" => {
                match args.get(i + 1) {
                    Some(s) => { scope = Some(s.clone()); i += 1; }
                    None => { eprintln!("Error: --scope requires a source id"); std::process::exit(1); }
                }
            }
            "--filter" => {
                match args.get(i + 1).and_then(|kv| kv.split_once('=')) {
                    Some((k, v)) => { filters.push((k.to_string(), v.to_string())); i += 1; }
                    None => { eprintln!("Error: --filter requires key=value"); std::process::exit(1); }
                }
            }
            "--embedding-file" => {
                match args.get(i + 1) {
                    Some(p) => { embedding_file = Some(PathBuf::from(p)); i += 1; }
                    None => { eprintln!("Error: --embedding-file requires a path"); std::process::exit(1); }
                }
            }
            "--rerank" => rerank = true,
            _ => {}
        }
        i += 1;
    }

    let db_uri: String = config
        .get("data.vector_db_dir")
        .unwrap_or_else(|_| "./dev_data/indexes/vectors".to_string());
    let text_index_dir: String = config
        .get("data.text_index_dir")
        .unwrap_or_else(|_| "./dev_data/indexes/text".to_string());
    let settings = config.engine_settings()?;

    println!("🔍 kbase-search\n===============");
    println!("Query: {}", query_text);
    println!("Vector store: {}", db_uri);
    println!("Lexical index: {}", text_index_dir);

    // The registry reflects whatever partitions ingestion has created.
    let registry = Arc::new(DimensionRegistry::new());
    let conn = open_db(&db_uri).await?;
    for (dimension, table) in discover_partitions(&conn).await? {
        registry.register(dimension, StorageLocator::new(table))?;
    }

    let vector = Arc::new(LanceVectorSource::new(&db_uri).await?);
    let lexical = Arc::new(TantivyLexicalSource::open(PathBuf::from(&text_index_dir))?);
    let chunks = Arc::new(LanceChunkStore::new(&db_uri).await?);
    let retrieval = settings.retrieval.clone();
    let mut engine = HybridRetrievalCoordinator::new(registry, vector, lexical, chunks, settings);
    if rerank {
        engine = engine.with_reranker(RerankEngine::new(
            Arc::new(TermOverlapScorer),
            retrieval.rerank_max_in_flight,
            retrieval.rerank_batch_size,
        ));
    }

    let mut query = SearchQuery::text(query_text.clone(), limit);
    if let Some(scope) = scope {
        query = query.with_scope(scope);
    }
    if let Some(path) = embedding_file {
        let raw = fs::read_to_string(&path)?;
        let embedding: Vec<f32> = serde_json::from_str(&raw)?;
        query = query.with_embedding(embedding);
    }
    if rerank {
        query = query.with_rerank();
    }
    for (k, v) in filters {
        query.filter.equals.insert(k, v);
    }

    let response = engine.search(&query).await?;
    println!("\n🔍 Found {} results for: \"{}\"", response.results.len(), query_text);
    for r in &response.results {
        let snippet: String = r.chunk.content.chars().take(160).collect();
        println!(
            "\n  {}. fused={:.4}  match={}  id={}  source={}",
            r.rank, r.fused_score, r.match_type, r.chunk.id, r.chunk.source_id
        );
        if let Some(score) = r.rerank_score {
            println!("     rerank={:.4}", score);
        }
        println!("     📝 {}", snippet);
    }
    for d in &response.degradations {
        match d {
            Degradation::PartialRetrieval { source, reason } => {
                println!("\n⚠️  partial retrieval ({}): {}", source, reason);
            }
            Degradation::Reranker { reason } => {
                println!("\n⚠️  rerank skipped: {}", reason);
            }
        }
    }
    Ok(())
}
