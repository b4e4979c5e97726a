//! Load-or-build management of the per-facet indices.
//!
//! A persisted index is reused only if its dimension and entry count match the
//! vectors it is supposed to cover; a mismatch is an error, never a silent
//! rebuild. A file that cannot be decoded at all is rebuilt.


use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::{FacetIndex, IndexKind, persist};
use crate::config::Config;
use crate::embeddings::EMBEDDING_DIMENSION;
use crate::{Facet, Result, StyleError};

/// Load the index for `facet` from `persisted_path`, or build it from `vectors`
/// and persist it there.
///
/// # Errors
/// * [`StyleError::IndexMismatch`] if the persisted index disagrees with `vectors`
/// * [`StyleError::EmptyInput`] if an index has to be built and `vectors` is empty
/// * [`StyleError::Dimension`] if the vectors are ragged or not [`EMBEDDING_DIMENSION`] long
#[inline]
pub fn get_or_build(
    facet: Facet,
    vectors: &[Vec<f32>],
    persisted_path: &Path,
    kind: IndexKind,
) -> Result<FacetIndex> {
    if persisted_path.exists() {
        info!(
            "Loading {} index from {}",
            facet,
            persisted_path.display()
        );
        match persist::read_index(persisted_path)? {
            Some(index) => {
                verify_against_catalog(&index, vectors.len(), persisted_path)?;
                if index.kind() != kind {
                    info!(
                        "{} index was built as {:?}; keeping it over the configured {:?}",
                        facet,
                        index.kind(),
                        kind
                    );
                }
                return Ok(index);
            }
            None => warn!(
                "Index file {} is unreadable, rebuilding {} index",
                persisted_path.display(),
                facet
            ),
        }
    } else {
        info!(
            "Index file not found. Building a new {:?} index for {}",
            kind, facet
        );
    }

    build_and_persist(facet, vectors, persisted_path, kind)
}

fn build_and_persist(
    facet: Facet,
    vectors: &[Vec<f32>],
    persisted_path: &Path,
    kind: IndexKind,
) -> Result<FacetIndex> {
    let index = FacetIndex::build(vectors, kind)?;
    if index.dimension() != EMBEDDING_DIMENSION {
        return Err(StyleError::Dimension(format!(
            "{} vectors have {} components, expected {}",
            facet,
            index.dimension(),
            EMBEDDING_DIMENSION
        )));
    }

    info!("Built {:?} index for {} with {} vectors", kind, facet, index.count());

    match persist::write_index(persisted_path, &index) {
        Ok(()) => info!("Index saved to {}", persisted_path.display()),
        Err(e) => warn!(
            "Could not persist {} index to {}: {}",
            facet,
            persisted_path.display(),
            e
        ),
    }

    Ok(index)
}

fn verify_against_catalog(index: &FacetIndex, expected_count: usize, path: &Path) -> Result<()> {
    if index.dimension() != EMBEDDING_DIMENSION {
        return Err(StyleError::IndexMismatch {
            path: path.to_path_buf(),
            reason: format!(
                "index dimension is {}, expected {}",
                index.dimension(),
                EMBEDDING_DIMENSION
            ),
        });
    }

    if index.count() != expected_count {
        return Err(StyleError::IndexMismatch {
            path: path.to_path_buf(),
            reason: format!(
                "index holds {} vectors, catalog has {}",
                index.count(),
                expected_count
            ),
        });
    }

    Ok(())
}

/// Owns the once-per-facet load/build of indices stored under one directory.
///
/// Each facet has its own guard: concurrent requests for the same facet wait
/// for a single builder, requests for other facets are not blocked.
#[derive(Debug)]
pub struct IndexManager {
    index_dir: PathBuf,
    kind: IndexKind,
    slots: [Mutex<Option<Arc<FacetIndex>>>; Facet::ALL.len()],
}

impl IndexManager {
    #[inline]
    pub fn new(index_dir: impl Into<PathBuf>, kind: IndexKind) -> Self {
        Self {
            index_dir: index_dir.into(),
            kind,
            slots: std::array::from_fn(|_| Mutex::new(None)),
        }
    }

    /// Manager for the index directory and algorithm named by `config`
    #[inline]
    pub fn for_config(config: &Config) -> Self {
        Self::new(config.index_dir(), config.search.index_kind())
    }

    #[inline]
    pub fn index_path(&self, facet: Facet) -> PathBuf {
        self.index_dir.join(facet.index_file_name())
    }

    /// The index for `facet`, loading or building it on first use
    #[inline]
    pub fn get_or_build(&self, facet: Facet, vectors: &[Vec<f32>]) -> Result<Arc<FacetIndex>> {
        let mut slot = self.lock_slot(facet)?;
        if let Some(index) = slot.as_ref() {
            debug!("Reusing loaded {} index", facet);
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(get_or_build(
            facet,
            vectors,
            &self.index_path(facet),
            self.kind,
        )?);
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Discard any persisted index for `facet` and build a fresh one
    #[inline]
    pub fn rebuild(&self, facet: Facet, vectors: &[Vec<f32>]) -> Result<Arc<FacetIndex>> {
        let mut slot = self.lock_slot(facet)?;
        let path = self.index_path(facet);

        match fs::remove_file(&path) {
            Ok(()) => info!("Removed persisted {} index at {}", facet, path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let index = Arc::new(build_and_persist(facet, vectors, &path, self.kind)?);
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// The index for `facet` if it has already been loaded
    #[inline]
    pub fn loaded(&self, facet: Facet) -> Option<Arc<FacetIndex>> {
        self.slots[facet.slot()]
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(Arc::clone))
    }

    fn lock_slot(
        &self,
        facet: Facet,
    ) -> Result<std::sync::MutexGuard<'_, Option<Arc<FacetIndex>>>> {
        self.slots[facet.slot()].lock().map_err(|_| {
            StyleError::Other(anyhow::anyhow!(
                "a previous build of the {} index panicked",
                facet
            ))
        })
    }
}
