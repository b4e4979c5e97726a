//! The catalog's vectors and metadata, held as parallel arrays keyed by position.
//!
//! A store is validated once when it is constructed and never mutated
//! afterwards. Updates build a new store and swap it in as a whole.


use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use bincode::Options;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embeddings::EMBEDDING_DIMENSION;
use crate::index::persist::{codec, temporary_sibling};
use crate::{Facet, Result, StyleError};

const STORE_MAGIC: [u8; 4] = *b"SSVS";
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Raw catalog columns, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogParts {
    pub slugs: Vec<String>,
    pub image_urls: Vec<String>,
    pub descriptions: Vec<String>,
    pub vectors: BTreeMap<Facet, Vec<Vec<f32>>>,
}

#[derive(Serialize)]
struct StoreSnapshotRef<'a> {
    magic: [u8; 4],
    version: u32,
    parts: &'a CatalogParts,
}

#[derive(Deserialize)]
struct StoreSnapshot {
    magic: [u8; 4],
    version: u32,
    parts: CatalogParts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    parts: CatalogParts,
    size: usize,
}

impl VectorStore {
    /// Validate `parts` and wrap them in a store.
    ///
    /// # Errors
    /// [`StyleError::Load`] if the columns differ in length, a facet is
    /// missing, or any vector is not [`EMBEDDING_DIMENSION`] long.
    #[inline]
    pub fn from_parts(parts: CatalogParts) -> Result<Self> {
        let size = parts.slugs.len();

        for (name, len) in [
            ("image_urls", parts.image_urls.len()),
            ("descriptions", parts.descriptions.len()),
        ] {
            if len != size {
                return Err(StyleError::Load(format!(
                    "{} has {} entries but there are {} slugs",
                    name, len, size
                )));
            }
        }

        for facet in Facet::ALL {
            let Some(vectors) = parts.vectors.get(&facet) else {
                return Err(StyleError::Load(format!("no vectors for facet {}", facet)));
            };

            if vectors.len() != size {
                return Err(StyleError::Load(format!(
                    "facet {} has {} vectors but there are {} slugs",
                    facet,
                    vectors.len(),
                    size
                )));
            }

            if let Some((position, vector)) = vectors
                .iter()
                .enumerate()
                .find(|(_, v)| v.len() != EMBEDDING_DIMENSION)
            {
                return Err(StyleError::Load(format!(
                    "facet {} vector at position {} has {} components, expected {}",
                    facet,
                    position,
                    vector.len(),
                    EMBEDDING_DIMENSION
                )));
            }
        }

        if let Some(extra) = parts.vectors.keys().find(|f| !Facet::ALL.contains(f)) {
            return Err(StyleError::Load(format!("unexpected facet {}", extra)));
        }

        Ok(Self { parts, size })
    }

    /// A store with no entries
    #[inline]
    pub fn empty() -> Self {
        Self {
            parts: CatalogParts {
                vectors: Facet::ALL.into_iter().map(|f| (f, Vec::new())).collect(),
                ..CatalogParts::default()
            },
            size: 0,
        }
    }

    /// Load a store previously written with [`VectorStore::save`].
    ///
    /// # Errors
    /// * [`StyleError::Io`] if the file cannot be opened
    /// * [`StyleError::Load`] if it is not a store file of the current format
    ///   or its contents fail validation
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let limit = file.metadata()?.len();
        let reader = BufReader::new(file);

        let snapshot: StoreSnapshot = codec()
            .with_limit(limit)
            .deserialize_from(reader)
            .map_err(|e| match *e {
                bincode::ErrorKind::Io(io) if io.kind() != ErrorKind::UnexpectedEof => {
                    StyleError::Io(io)
                }
                other => StyleError::Load(format!(
                    "cannot decode catalog {}: {}",
                    path.display(),
                    other
                )),
            })?;

        if snapshot.magic != STORE_MAGIC {
            return Err(StyleError::Load(format!(
                "{} is not a catalog file",
                path.display()
            )));
        }

        if snapshot.version != STORE_FORMAT_VERSION {
            return Err(StyleError::Load(format!(
                "catalog {} has format version {}, expected {}",
                path.display(),
                snapshot.version,
                STORE_FORMAT_VERSION
            )));
        }

        let store = Self::from_parts(snapshot.parts)?;
        info!(
            "Loaded catalog with {} entries from {}",
            store.size(),
            path.display()
        );
        Ok(store)
    }

    /// Write the store to `path`, replacing any previous file atomically
    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = temporary_sibling(path);

        let snapshot = StoreSnapshotRef {
            magic: STORE_MAGIC,
            version: STORE_FORMAT_VERSION,
            parts: &self.parts,
        };

        let write_result = (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            codec().serialize_into(&mut writer, &snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, path)?;
        debug!("Saved catalog with {} entries to {}", self.size, path.display());
        Ok(())
    }

    /// All vectors of `facet`, in position order
    #[inline]
    pub fn vectors_for(&self, facet: Facet) -> &[Vec<f32>] {
        self.parts
            .vectors
            .get(&facet)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[inline]
    pub fn slug_at(&self, position: usize) -> Option<&str> {
        self.parts.slugs.get(position).map(String::as_str)
    }

    #[inline]
    pub fn image_url_at(&self, position: usize) -> Option<&str> {
        self.parts.image_urls.get(position).map(String::as_str)
    }

    #[inline]
    pub fn description_at(&self, position: usize) -> Option<&str> {
        self.parts.descriptions.get(position).map(String::as_str)
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}
