//! Query execution against facet indices and post-processing of the hits.

pub mod executor;
pub mod ranker;

pub use executor::{FacetIndices, search, search_named};
pub use ranker::{RankedResults, finalize};

/// Number of results left after deduplication unless configured otherwise
pub const DEFAULT_MAX_RESULTS: usize = 6;

/// Neighbors requested per query unless the caller asks for another amount
pub const DEFAULT_K: usize = 5;
