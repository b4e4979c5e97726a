use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::Facet;
use crate::caption::{Caption, CaptionClient, ImageSource};
use crate::config::Config;
use crate::embeddings::{EmbeddingAdapter, OllamaClient};
use crate::index::{IndexManager, persist};
use crate::ingest;
use crate::search::RankedResults;
use crate::service::{IndexLoad, StyleSearchRequest, StyleSearchService};
use crate::store::VectorStore;

/// What a `search` invocation searches with
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Text(String),
    Vector(Vec<f32>),
    ImageUrl(String),
    ImageFile(PathBuf),
}

/// Parse a query vector given as a JSON array of numbers
#[inline]
pub fn parse_query_vector(raw: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw).context("Query vector must be a JSON array of numbers")
}

/// Embed a JSON Lines catalog and save it as the vector store
#[inline]
pub fn ingest_catalog(config_dir: &Path, source: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;
    let adapter = EmbeddingAdapter::new(OllamaClient::new(&config)?);

    let report = ingest::ingest_file(source, &config.store_path(), &adapter, true)?;

    println!("✅ Ingested {} catalog entries", report.records);
    if report.failed_embeddings > 0 {
        println!(
            "⚠️  {} facet vectors could not be embedded and were stored as zeros",
            report.failed_embeddings
        );
    }
    println!("   Catalog: {}", config.store_path().display());
    println!("   Run 'style-search build-index --rebuild' to refresh the indices.");
    Ok(())
}

/// Load or build the index of every facet
#[inline]
pub fn build_indexes(config_dir: &Path, rebuild: bool) -> Result<()> {
    let config = Config::load(config_dir)?;
    let load = if rebuild {
        IndexLoad::Rebuild
    } else {
        IndexLoad::Reuse
    };

    let service = StyleSearchService::open_with(&config, load)?;

    println!(
        "✅ Indices ready for {} catalog entries",
        service.store().size()
    );
    for (facet, index) in service.indices().iter() {
        println!(
            "   {:<12} {:>8} vectors  {:?}",
            facet.as_str(),
            index.count(),
            index.kind()
        );
    }
    Ok(())
}

/// Run one query and print the ranked results as JSON
#[inline]
pub async fn run_search(
    config_dir: &Path,
    facet: Facet,
    k: Option<usize>,
    query: SearchQuery,
) -> Result<()> {
    let config = Config::load(config_dir)?;
    let service = Arc::new(StyleSearchService::open(&config)?);
    let k = k.unwrap_or_else(|| service.default_k());

    let results = match query {
        SearchQuery::Vector(query_vector) => {
            let request = StyleSearchRequest {
                query_vector,
                search_type: facet.as_str().to_string(),
                k,
            };
            let timeout = service.query_timeout();
            service.search_with_timeout(request, timeout).await?
        }
        SearchQuery::Text(text) => {
            let adapter = EmbeddingAdapter::new(OllamaClient::new(&config)?);
            tokio::task::spawn_blocking(move || service.search_text(&adapter, &text, facet, k))
                .await
                .context("Search task failed")??
        }
        SearchQuery::ImageUrl(_) | SearchQuery::ImageFile(_) => {
            if facet != Facet::AllAiInfo {
                info!("Image queries always search the {} facet", Facet::AllAiInfo);
            }
            let source = image_source(&query)?;
            let captioner = CaptionClient::new(&config)?;
            let adapter = EmbeddingAdapter::new(OllamaClient::new(&config)?);
            tokio::task::spawn_blocking(move || {
                let caption = captioner.caption(&source);
                service.search_caption(&adapter, &caption, k)
            })
            .await
            .context("Search task failed")??
        }
    };

    print_results(&results)
}

fn image_source(query: &SearchQuery) -> Result<ImageSource> {
    match query {
        SearchQuery::ImageUrl(url) => ImageSource::parse_url(url),
        SearchQuery::ImageFile(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            Ok(ImageSource::Bytes(bytes))
        }
        other => Err(anyhow::anyhow!("{:?} is not an image query", other)),
    }
}

fn print_results(results: &RankedResults) -> Result<()> {
    if results.is_empty() {
        warn!("Query returned no results");
    }
    let json = serde_json::to_string_pretty(results).context("Failed to serialize results")?;
    println!("{}", json);
    Ok(())
}

/// Print the fitted 100-component embedding of `text` as JSON
#[inline]
pub fn embed_text(config_dir: &Path, text: &str) -> Result<()> {
    let config = Config::load(config_dir)?;
    let adapter = EmbeddingAdapter::new(OllamaClient::new(&config)?);

    let vector = adapter.embed_and_fit(text)?;
    println!(
        "{}",
        serde_json::to_string(&vector).context("Failed to serialize vector")?
    );
    Ok(())
}

/// Caption an image and print the caption as JSON
#[inline]
pub fn caption_image(config_dir: &Path, url: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_dir)?;
    let client = CaptionClient::new(&config)?;

    let source = match (url, file) {
        (Some(url), None) => image_source(&SearchQuery::ImageUrl(url))?,
        (None, Some(file)) => image_source(&SearchQuery::ImageFile(file))?,
        _ => return Err(anyhow::anyhow!("Provide exactly one of --url or --file")),
    };

    let caption: Caption = client.try_caption(&source)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&caption).context("Failed to serialize caption")?
    );
    Ok(())
}

/// Show the state of the configuration, the Ollama backend, the catalog and the indices
#[inline]
pub fn show_status(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).unwrap_or_else(|e| {
        warn!("Using default configuration: {:#}", e);
        Config {
            base_dir: config_dir.to_path_buf(),
            ..Config::default()
        }
    });

    println!("📊 Style Search Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("⚙️  Configuration:");
    println!("   📁 Directory: {}", config.get_base_dir().display());
    println!(
        "   🔍 Index: {:?}, max {} results",
        config.search.index_kind(),
        config.search.max_results
    );
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Embedding model: {}", config.ollama.embedding_model);
            }
            Err(e) => println!("   ⚠️  Ollama: Connected but unhealthy - {:#}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid settings - {:#}", e),
    }
    println!("   👁️  Vision model: {}", config.ollama.vision_model);
    println!();

    println!("🗂️  Catalog:");
    let store_path = config.store_path();
    let store = if store_path.exists() {
        match VectorStore::load(&store_path) {
            Ok(store) => {
                println!("   ✅ {} entries in {}", store.size(), store_path.display());
                Some(store)
            }
            Err(e) => {
                println!("   ❌ Unreadable catalog - {}", e);
                None
            }
        }
    } else {
        println!("   💤 No catalog yet. Use 'style-search ingest <file.jsonl>'.");
        None
    };
    println!();

    println!("🔍 Indices:");
    let manager = IndexManager::for_config(&config);
    for facet in Facet::ALL {
        let path = manager.index_path(facet);
        if !path.exists() {
            println!("   💤 {:<12} not built", facet.as_str());
            continue;
        }

        match persist::read_index(&path) {
            Ok(Some(index)) => {
                let expected = store.as_ref().map(VectorStore::size);
                let marker = match expected {
                    Some(size) if size != index.count() => "⚠️ ",
                    _ => "✅",
                };
                println!(
                    "   {} {:<12} {:>8} vectors  {:?}",
                    marker,
                    facet.as_str(),
                    index.count(),
                    index.kind()
                );
            }
            Ok(None) => println!("   ❌ {:<12} unreadable, will be rebuilt", facet.as_str()),
            Err(e) => println!("   ❌ {:<12} {}", facet.as_str(), e),
        }
    }

    Ok(())
}
