
use std::sync::Arc;

use tracing::debug;

use crate::index::{FacetIndex, SearchResult};
use crate::{Facet, Result, StyleError};

/// Run a k-nearest-neighbor query against one facet index.
///
/// # Errors
/// [`StyleError::DimensionMismatch`] if the query length differs from the index dimension
#[inline]
pub fn search(index: &FacetIndex, query: &[f32], k: usize) -> Result<SearchResult> {
    let result = index.search(query, k)?;
    debug!(
        "Query returned {} of {} requested neighbors from {} entries",
        result.len(),
        k,
        index.count()
    );
    Ok(result)
}

/// Run a query against the index of the facet called `facet_name`
///
/// # Errors
/// * [`StyleError::InvalidFacet`] if `facet_name` is not a known facet
/// * [`StyleError::DimensionMismatch`] if the query length differs from the index dimension
#[inline]
pub fn search_named(
    indices: &FacetIndices,
    facet_name: &str,
    query: &[f32],
    k: usize,
) -> Result<SearchResult> {
    let facet: Facet = facet_name.parse()?;
    search(indices.get(facet), query, k)
}

/// One loaded index per facet, shared read-only between queries
#[derive(Debug, Clone)]
pub struct FacetIndices {
    indices: [Arc<FacetIndex>; Facet::ALL.len()],
}

impl FacetIndices {
    /// Collect one index per facet, in [`Facet::ALL`] order
    ///
    /// # Errors
    /// [`StyleError::Other`] unless exactly one index per facet is supplied
    #[inline]
    pub fn new(indices: Vec<(Facet, Arc<FacetIndex>)>) -> Result<Self> {
        let mut slots: [Option<Arc<FacetIndex>>; Facet::ALL.len()] = Default::default();
        for (facet, index) in indices {
            if slots[facet.slot()].replace(index).is_some() {
                return Err(StyleError::Other(anyhow::anyhow!(
                    "index for {} supplied twice",
                    facet
                )));
            }
        }

        let mut missing = Vec::new();
        for facet in Facet::ALL {
            if slots[facet.slot()].is_none() {
                missing.push(facet.as_str());
            }
        }
        if !missing.is_empty() {
            return Err(StyleError::Other(anyhow::anyhow!(
                "no index for {}",
                missing.join(", ")
            )));
        }

        let indices: Vec<Arc<FacetIndex>> = slots.into_iter().flatten().collect();
        let indices = indices.try_into().map_err(|_| {
            StyleError::Other(anyhow::anyhow!("facet indices are incomplete"))
        })?;
        Ok(Self { indices })
    }

    #[inline]
    pub fn get(&self, facet: Facet) -> &FacetIndex {
        &self.indices[facet.slot()]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Facet, &FacetIndex)> {
        Facet::ALL
            .into_iter()
            .map(|facet| (facet, self.get(facet)))
    }
}
