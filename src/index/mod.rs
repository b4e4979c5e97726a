//! Nearest-neighbor indices over one facet's vectors.
//!
//! An index is immutable once built. Two algorithms are available: an exact
//! flat scan and an inverted-file (IVF) variant that only scans the clusters
//! closest to the query. Both rank by squared Euclidean distance and break
//! ties by ascending position.


pub mod ivf;
pub mod manager;
pub mod persist;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, StyleError};
use ivf::IvfClusters;

pub use manager::{IndexManager, get_or_build};

/// Algorithm an index was built with, recorded alongside it on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Exact scan over every vector
    Flat,
    /// Clustered scan over the `nprobe` clusters nearest to the query
    Ivf { nlist: usize, nprobe: usize },
}

/// One search hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub distance: f32,
    pub position: usize,
}

impl Neighbor {
    #[inline]
    pub const fn new(distance: f32, position: usize) -> Self {
        Self { distance, position }
    }

    /// Ascending distance, ties broken by ascending position
    #[inline]
    pub fn ranking_cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.position.cmp(&other.position))
    }
}

/// Ordered neighbors of a query, closest first
pub type SearchResult = Vec<Neighbor>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetIndex {
    kind: IndexKind,
    dimension: usize,
    count: usize,
    /// Row-major `count × dimension` matrix
    vectors: Vec<f32>,
    clusters: Option<IvfClusters>,
}

impl FacetIndex {
    /// Build an index over `vectors`.
    ///
    /// # Errors
    /// * [`StyleError::EmptyInput`] if `vectors` is empty
    /// * [`StyleError::Dimension`] if the vectors do not all have the same length
    #[inline]
    pub fn build(vectors: &[Vec<f32>], kind: IndexKind) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Err(StyleError::EmptyInput);
        };

        let dimension = first.len();
        if dimension == 0 {
            return Err(StyleError::Dimension(
                "vectors must have at least one component".to_string(),
            ));
        }

        if let Some((position, vector)) = vectors
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != dimension)
        {
            return Err(StyleError::Dimension(format!(
                "vector at position {} has {} components, expected {}",
                position,
                vector.len(),
                dimension
            )));
        }

        let count = vectors.len();
        let flat: Vec<f32> = vectors.iter().flatten().copied().collect();

        let clusters = match kind {
            IndexKind::Flat => None,
            IndexKind::Ivf { nlist, nprobe } => {
                Some(IvfClusters::train(&flat, dimension, nlist, nprobe))
            }
        };

        debug!(
            "Built {:?} index with {} vectors of dimension {}",
            kind, count, dimension
        );

        Ok(Self {
            kind,
            dimension,
            count,
            vectors: flat,
            clusters,
        })
    }

    /// An index with no entries. Every search against it returns nothing.
    #[inline]
    pub const fn empty(dimension: usize) -> Self {
        Self {
            kind: IndexKind::Flat,
            dimension,
            count: 0,
            vectors: Vec::new(),
            clusters: None,
        }
    }

    #[inline]
    pub const fn kind(&self) -> IndexKind {
        self.kind
    }

    #[inline]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Return up to `k` neighbors of `query`, closest first.
    ///
    /// `k` is clamped to `[1, count]`. The IVF variant may return fewer than
    /// `k` neighbors when the probed clusters hold fewer vectors.
    ///
    /// # Errors
    /// [`StyleError::DimensionMismatch`] if the query length differs from the index dimension
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchResult> {
        if query.len() != self.dimension {
            return Err(StyleError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if self.count == 0 {
            return Ok(Vec::new());
        }

        let k = k.clamp(1, self.count);

        let scored: Vec<Neighbor> = match &self.clusters {
            None => (0..self.count)
                .map(|position| Neighbor::new(squared_l2(query, self.row(position)), position))
                .collect(),
            Some(clusters) => clusters
                .candidates(query)
                .map(|position| Neighbor::new(squared_l2(query, self.row(position)), position))
                .collect(),
        };

        Ok(top_k(scored, k))
    }

    /// Check that a deserialized index is internally consistent
    pub(crate) fn check_consistency(&self) -> Result<()> {
        if self.vectors.len() != self.count.saturating_mul(self.dimension) {
            return Err(StyleError::Dimension(format!(
                "index holds {} values, expected {} × {}",
                self.vectors.len(),
                self.count,
                self.dimension
            )));
        }

        match (&self.kind, &self.clusters) {
            (IndexKind::Flat, None) => Ok(()),
            (IndexKind::Ivf { .. }, Some(clusters)) => {
                clusters.check_consistency(self.dimension, self.count)
            }
            _ => Err(StyleError::Dimension(
                "index kind does not match its cluster data".to_string(),
            )),
        }
    }

    fn row(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.vectors[start..start + self.dimension]
    }
}

/// Squared Euclidean distance between two equally long vectors
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Keep the `k` best neighbors, fully ordered by [`Neighbor::ranking_cmp`]
pub(crate) fn top_k(mut scored: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    if k == 0 {
        return Vec::new();
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, Neighbor::ranking_cmp);
        scored.truncate(k);
    }
    scored.sort_unstable_by(Neighbor::ranking_cmp);
    scored
}
