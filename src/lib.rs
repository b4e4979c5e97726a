use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StyleError>;

#[derive(Error, Debug)]
pub enum StyleError {
    #[error("Catalog load error: {0}")]
    Load(String),

    #[error("Persisted index {} does not match the catalog: {reason}", path.display())]
    IndexMismatch { path: PathBuf, reason: String },

    #[error("Vector dimension error: {0}")]
    Dimension(String),

    #[error("Query vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid search type: {0}")]
    InvalidFacet(String),

    #[error("Cannot build an index from an empty set of vectors")]
    EmptyInput,

    #[error("Cannot normalize a zero vector")]
    ZeroVector,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Caption error: {0}")]
    Caption(String),

    #[error("Search timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StyleError {
    /// Whether the error was caused by the request rather than by the service state.
    ///
    /// Request errors are reported back to the caller as a rejected request;
    /// everything else is an internal failure.
    #[inline]
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFacet(_)
                | Self::DimensionMismatch { .. }
                | Self::ZeroVector
                | Self::Timeout(_)
        )
    }
}

pub mod caption;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod facet;
pub mod index;
pub mod ingest;
pub mod search;
pub mod service;
pub mod store;

pub use facet::Facet;
