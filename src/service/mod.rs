//! The search service: a loaded catalog plus one index per facet, queried
//! concurrently without locks.
//!
//! [`StyleSearchService`] is immutable once opened. [`SharedService`] holds the
//! current instance and swaps in a freshly opened one on reload, so in-flight
//! queries finish against the instance they started with.


use std::sync::{Arc, RwLock};
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::caption::Caption;
use crate::config::{Config, SearchConfig};
use crate::embeddings::{EMBEDDING_DIMENSION, Embedder, EmbeddingAdapter};
use crate::index::{FacetIndex, IndexManager};
use crate::search::{self, DEFAULT_K, FacetIndices, RankedResults};
use crate::store::VectorStore;
use crate::{Facet, Result, StyleError};

/// A query by vector against one facet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleSearchRequest {
    pub query_vector: Vec<f32>,
    /// Facet name, one of `content`, `style`, `features`, `color`, `all_ai_info`
    pub search_type: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    DEFAULT_K
}

/// Whether existing index files may be reused when opening the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLoad {
    Reuse,
    Rebuild,
}

#[derive(Debug)]
pub struct StyleSearchService {
    store: VectorStore,
    indices: FacetIndices,
    max_results: usize,
    default_k: usize,
    query_timeout: Duration,
}

impl StyleSearchService {
    /// Load the catalog and the facet indices described by `config`
    #[inline]
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with(config, IndexLoad::Reuse)
    }

    #[inline]
    pub fn open_with(config: &Config, load: IndexLoad) -> Result<Self> {
        let store_path = config.store_path();
        if !store_path.exists() {
            return Err(StyleError::Load(format!(
                "no catalog at {}, run `ingest` first",
                store_path.display()
            )));
        }

        let store = VectorStore::load(&store_path)?;
        let manager = IndexManager::for_config(config);
        Self::from_store(store, &manager, &config.search, load)
    }

    /// Build the service around an already loaded store
    #[inline]
    pub fn from_store(
        store: VectorStore,
        manager: &IndexManager,
        settings: &SearchConfig,
        load: IndexLoad,
    ) -> Result<Self> {
        let indices = load_indices(&store, manager, load)?;

        info!(
            "Search service ready with {} catalog entries",
            store.size()
        );

        Ok(Self {
            store,
            indices,
            max_results: settings.max_results,
            default_k: settings.default_k,
            query_timeout: settings.query_timeout(),
        })
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    #[inline]
    pub fn indices(&self) -> &FacetIndices {
        &self.indices
    }

    #[inline]
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    #[inline]
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Search the facet named in `request` with its query vector
    ///
    /// # Errors
    /// * [`StyleError::InvalidFacet`] for an unknown `search_type`
    /// * [`StyleError::DimensionMismatch`] if the vector is not 100 components long
    #[inline]
    pub fn style_search(&self, request: &StyleSearchRequest) -> Result<RankedResults> {
        let neighbors = search::search_named(
            &self.indices,
            &request.search_type,
            &request.query_vector,
            request.k,
        )?;
        Ok(search::finalize(&neighbors, &self.store, self.max_results))
    }

    #[inline]
    pub fn search_vector(&self, facet: Facet, query: &[f32], k: usize) -> Result<RankedResults> {
        let neighbors = search::search(self.indices.get(facet), query, k)?;
        Ok(search::finalize(&neighbors, &self.store, self.max_results))
    }

    /// Embed `text` and search `facet` with it.
    ///
    /// An unreachable or failing embedding model yields an empty result.
    #[inline]
    pub fn search_text<E: Embedder>(
        &self,
        adapter: &EmbeddingAdapter<E>,
        text: &str,
        facet: Facet,
        k: usize,
    ) -> Result<RankedResults> {
        let query = match adapter.embed_and_fit(text) {
            Ok(query) => query,
            Err(StyleError::Embedding(e)) => {
                warn!("Embedding the query failed, returning no results: {}", e);
                return Ok(RankedResults::default());
            }
            Err(e) => return Err(e),
        };

        debug!("Searching {} with embedded text query", facet);
        self.search_vector(facet, &query, k)
    }

    /// Search the combined-description facet with the text of a caption.
    /// An empty caption yields an empty result.
    #[inline]
    pub fn search_caption<E: Embedder>(
        &self,
        adapter: &EmbeddingAdapter<E>,
        caption: &Caption,
        k: usize,
    ) -> Result<RankedResults> {
        if caption.is_empty() {
            debug!("Empty caption, nothing to search for");
            return Ok(RankedResults::default());
        }

        self.search_text(adapter, &caption.combined_text(), Facet::AllAiInfo, k)
    }

    /// Run [`StyleSearchService::style_search`] on the blocking pool, giving up
    /// after `timeout`. An abandoned search finishes in the background and its
    /// result is dropped.
    #[inline]
    pub async fn search_with_timeout(
        self: Arc<Self>,
        request: StyleSearchRequest,
        timeout: Duration,
    ) -> Result<RankedResults> {
        let task = tokio::task::spawn_blocking(move || self.style_search(&request));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(StyleError::Other(anyhow::anyhow!(
                "search task failed: {}",
                join_error
            ))),
            Err(_) => {
                warn!("Search abandoned after {:?}", timeout);
                Err(StyleError::Timeout(timeout))
            }
        }
    }
}

/// Load or build the index of every facet, in parallel
#[inline]
pub fn load_indices(
    store: &VectorStore,
    manager: &IndexManager,
    load: IndexLoad,
) -> Result<FacetIndices> {
    if store.is_empty() {
        info!("Catalog is empty, every search will return no results");
        let empty = Arc::new(FacetIndex::empty(EMBEDDING_DIMENSION));
        return FacetIndices::new(
            Facet::ALL
                .into_iter()
                .map(|facet| (facet, Arc::clone(&empty)))
                .collect(),
        );
    }

    let loaded = Facet::ALL
        .par_iter()
        .map(|&facet| -> Result<(Facet, Arc<FacetIndex>)> {
            let vectors = store.vectors_for(facet);
            let index = match load {
                IndexLoad::Reuse => manager.get_or_build(facet, vectors)?,
                IndexLoad::Rebuild => manager.rebuild(facet, vectors)?,
            };
            Ok((facet, index))
        })
        .collect::<Result<Vec<_>>>()?;

    FacetIndices::new(loaded)
}

/// Handle to the current service, replaceable while queries are running
#[derive(Debug)]
pub struct SharedService {
    current: RwLock<Arc<StyleSearchService>>,
}

impl SharedService {
    #[inline]
    pub fn new(service: StyleSearchService) -> Self {
        Self {
            current: RwLock::new(Arc::new(service)),
        }
    }

    /// The service queries should run against right now
    #[inline]
    pub fn current(&self) -> Arc<StyleSearchService> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Install `service`, returning the one it replaces
    #[inline]
    pub fn replace(&self, service: StyleSearchService) -> Arc<StyleSearchService> {
        let service = Arc::new(service);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, service)
    }

    /// Open a new service from `config` and swap it in. On failure the
    /// current service stays in place.
    #[inline]
    pub fn reload(&self, config: &Config) -> Result<()> {
        let service = StyleSearchService::open(config)?;
        let size = service.store().size();
        self.replace(service);
        info!("Reloaded search service with {} catalog entries", size);
        Ok(())
    }
}
