//! Offline catalog ingestion: JSON Lines records in, a persisted [`VectorStore`] out.


use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::Facet;
use crate::embeddings::{EMBEDDING_DIMENSION, Embedder, EmbeddingAdapter};
use crate::store::{CatalogParts, VectorStore};

/// One line of the catalog source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CatalogRecord {
    pub slug: String,
    pub slug_new: String,
    pub img_url: String,
    pub desc_zh: String,
    pub ai_desc_zh: String,
    pub ai_style_zh: String,
    pub ai_features_zh: String,
    pub ai_color_zh: String,
}

impl CatalogRecord {
    /// Public slug of the entry, falling back to the internal one
    #[inline]
    pub fn public_slug(&self) -> &str {
        if self.slug_new.is_empty() {
            &self.slug
        } else {
            &self.slug_new
        }
    }

    /// Description shown with results and embedded for `all_ai_info`
    #[inline]
    pub fn composite_description(&self) -> String {
        format!(
            "描述: {} 风格: {} 特征: {}  颜色: {}",
            self.ai_desc_zh, self.ai_style_zh, self.ai_features_zh, self.ai_color_zh
        )
    }

    /// Text embedded for `facet`
    #[inline]
    pub fn facet_text(&self, facet: Facet) -> String {
        match facet {
            Facet::Content => self.desc_zh.clone(),
            Facet::Style => self.ai_style_zh.clone(),
            Facet::Features => self.ai_features_zh.clone(),
            Facet::Color => self.ai_color_zh.clone(),
            Facet::AllAiInfo => self.composite_description(),
        }
    }
}

/// Outcome of an ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub records: usize,
    /// Facet vectors that could not be embedded and were stored as zeros
    pub failed_embeddings: usize,
}

/// Read catalog records from a JSON Lines file. Blank lines are skipped.
#[inline]
pub fn read_records(path: &Path) -> Result<Vec<CatalogRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open catalog source {}", path.display()))?;

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }

        let record: CatalogRecord = serde_json::from_str(&line).with_context(|| {
            format!("Invalid catalog record on line {} of {}", number + 1, path.display())
        })?;
        records.push(record);
    }

    info!("Read {} catalog records from {}", records.len(), path.display());
    Ok(records)
}

/// Embed every facet of every record and assemble a store.
///
/// A facet that cannot be embedded gets a zero vector so that all columns
/// stay aligned; such failures are logged and counted in the report.
#[inline]
pub fn build_store<E: Embedder>(
    records: &[CatalogRecord],
    adapter: &EmbeddingAdapter<E>,
    show_progress: bool,
) -> Result<(VectorStore, IngestReport)> {
    let mut parts = CatalogParts {
        slugs: Vec::with_capacity(records.len()),
        image_urls: Vec::with_capacity(records.len()),
        descriptions: Vec::with_capacity(records.len()),
        vectors: Facet::ALL
            .into_iter()
            .map(|facet| (facet, Vec::with_capacity(records.len())))
            .collect::<BTreeMap<_, _>>(),
    };
    let mut report = IngestReport {
        records: records.len(),
        failed_embeddings: 0,
    };

    let bar = if show_progress && console::user_attended_stderr() {
        ProgressBar::new(records.len() as u64).with_style(
            ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
    } else {
        ProgressBar::hidden()
    };

    for record in records {
        let slug = record.public_slug();
        bar.set_message(slug.to_string());

        let texts: Vec<String> = Facet::ALL
            .into_iter()
            .map(|facet| record.facet_text(facet))
            .collect();

        let fitted: Vec<Result<Vec<f32>, String>> = match adapter.embed_and_fit_batch(&texts) {
            Ok(fitted) => fitted
                .into_iter()
                .map(|r| r.map_err(|e| e.to_string()))
                .collect(),
            Err(e) => {
                warn!("Embedding failed for {}: {}", slug, e);
                Facet::ALL.iter().map(|_| Err(e.to_string())).collect()
            }
        };

        for (facet, vector) in Facet::ALL.into_iter().zip(fitted) {
            let vector = vector.unwrap_or_else(|e| {
                warn!("Storing zero vector for {} facet {}: {}", slug, facet, e);
                report.failed_embeddings += 1;
                vec![0.0; EMBEDDING_DIMENSION]
            });
            if let Some(column) = parts.vectors.get_mut(&facet) {
                column.push(vector);
            }
        }

        parts.slugs.push(slug.to_string());
        parts.image_urls.push(record.img_url.clone());
        parts.descriptions.push(record.composite_description());
        bar.inc(1);
        debug!("Embedded catalog entry {}", slug);
    }

    bar.finish_and_clear();

    let store = VectorStore::from_parts(parts).context("Ingested catalog is inconsistent")?;
    Ok((store, report))
}

/// Read `source`, embed it and save the resulting store to `store_path`
#[inline]
pub fn ingest_file<E: Embedder>(
    source: &Path,
    store_path: &Path,
    adapter: &EmbeddingAdapter<E>,
    show_progress: bool,
) -> Result<IngestReport> {
    let records = read_records(source)?;
    let (store, report) = build_store(&records, adapter, show_progress)?;

    store
        .save(store_path)
        .with_context(|| format!("Failed to save catalog to {}", store_path.display()))?;

    if report.failed_embeddings > 0 {
        warn!(
            "{} facet vectors of {} records could not be embedded and were stored as zeros",
            report.failed_embeddings, report.records
        );
    }
    info!(
        "Ingested {} records into {}",
        report.records,
        store_path.display()
    );
    Ok(report)
}
