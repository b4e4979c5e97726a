//! On-disk format of a facet index.
//!
//! A file holds a magic tag, a format version and the index itself, which
//! records its algorithm, dimension and entry count. Files are written to a
//! temporary sibling and renamed into place so a reader never sees a partial
//! index.


use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::Options;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::FacetIndex;
use crate::Result;

const INDEX_MAGIC: [u8; 4] = *b"SSIX";
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    magic: [u8; 4],
    version: u32,
    index: &'a FacetIndex,
}

#[derive(Deserialize)]
struct PersistedIndex {
    magic: [u8; 4],
    version: u32,
    index: FacetIndex,
}

pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Write `index` to `path`, creating the parent directory if needed
#[inline]
pub fn write_index(path: &Path, index: &FacetIndex) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temporary_sibling(path);
    let persisted = PersistedIndexRef {
        magic: INDEX_MAGIC,
        version: INDEX_FORMAT_VERSION,
        index,
    };

    let write_result = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        codec().serialize_into(&mut writer, &persisted)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path)?;
    debug!(
        "Persisted index with {} vectors to {}",
        index.count(),
        path.display()
    );
    Ok(())
}

/// Read an index from `path`.
///
/// Returns `Ok(None)` when the file exists but is not a readable index of the
/// current format (wrong magic, other version, truncated or inconsistent
/// data). I/O failures such as a missing file or denied access are errors.
#[inline]
pub fn read_index(path: &Path) -> Result<Option<FacetIndex>> {
    let file = File::open(path)?;
    let limit = file.metadata()?.len();
    let reader = BufReader::new(file);

    let persisted: PersistedIndex = match codec().with_limit(limit).deserialize_from(reader) {
        Ok(persisted) => persisted,
        Err(e) => match *e {
            bincode::ErrorKind::Io(io) if io.kind() != ErrorKind::UnexpectedEof => {
                return Err(io.into());
            }
            other => {
                warn!("Could not decode index file {}: {}", path.display(), other);
                return Ok(None);
            }
        },
    };

    if persisted.magic != INDEX_MAGIC {
        warn!("{} is not an index file", path.display());
        return Ok(None);
    }

    if persisted.version != INDEX_FORMAT_VERSION {
        warn!(
            "Index file {} has format version {}, expected {}",
            path.display(),
            persisted.version,
            INDEX_FORMAT_VERSION
        );
        return Ok(None);
    }

    if let Err(e) = persisted.index.check_consistency() {
        warn!("Index file {} is inconsistent: {}", path.display(), e);
        return Ok(None);
    }

    Ok(Some(persisted.index))
}

/// Unique per call, so concurrent writers of one path never share a temporary file
pub(crate) fn temporary_sibling(path: &Path) -> PathBuf {
    static NEXT_WRITE: AtomicU64 = AtomicU64::new(0);

    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(
        ".tmp{}-{}",
        std::process::id(),
        NEXT_WRITE.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}
