
use tracing::debug;

use crate::{Result, StyleError};

/// Dimension shared by every stored vector, every index and every query
pub const EMBEDDING_DIMENSION: usize = 100;

/// An external text embedding model.
///
/// Implementations return the raw model output; fitting it to
/// [`EMBEDDING_DIMENSION`] is the job of [`EmbeddingAdapter`].
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embed several texts at once. The result is aligned with `texts`.
    #[inline]
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    #[inline]
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        (**self).embed(text)
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }
}

/// Truncate a raw embedding to its first [`EMBEDDING_DIMENSION`] components and
/// scale the result to unit L2 length.
///
/// This is the only place vectors are fitted; ingestion and queries both go
/// through it so that stored and query vectors stay comparable.
///
/// # Errors
/// * [`StyleError::Dimension`] if the raw vector is shorter than the target dimension
/// * [`StyleError::ZeroVector`] if the truncated vector has zero length
/// * [`StyleError::Embedding`] if the vector contains non-finite values
#[inline]
pub fn fit_embedding(raw: &[f32]) -> Result<Vec<f32>> {
    let Some(truncated) = raw.get(..EMBEDDING_DIMENSION) else {
        return Err(StyleError::Dimension(format!(
            "embedding has {} components, at least {} are required",
            raw.len(),
            EMBEDDING_DIMENSION
        )));
    };

    if !truncated.iter().all(|v| v.is_finite()) {
        return Err(StyleError::Embedding(
            "embedding contains non-finite values".to_string(),
        ));
    }

    // Accumulated in f64 so tiny or huge components neither underflow nor overflow
    let norm = truncated
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 {
        return Err(StyleError::ZeroVector);
    }

    Ok(truncated
        .iter()
        .map(|&v| (f64::from(v) / norm) as f32)
        .collect())
}

/// Turns text into index-ready vectors using an external [`Embedder`]
#[derive(Debug, Clone)]
pub struct EmbeddingAdapter<E> {
    embedder: E,
}

impl<E: Embedder> EmbeddingAdapter<E> {
    #[inline]
    pub const fn new(embedder: E) -> Self {
        Self { embedder }
    }

    #[inline]
    pub const fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Embed `text` and fit it to [`EMBEDDING_DIMENSION`]
    #[inline]
    pub fn embed_and_fit(&self, text: &str) -> Result<Vec<f32>> {
        let raw = self
            .embedder
            .embed(text)
            .map_err(|e| StyleError::Embedding(format!("{:#}", e)))?;
        debug!("Fitting raw embedding of {} dimensions", raw.len());
        fit_embedding(&raw)
    }

    /// Embed a batch of texts. Each entry of the result is fitted independently,
    /// so one degenerate vector does not fail the others.
    ///
    /// # Errors
    /// Returns an error only when the model call itself fails or returns a
    /// different number of vectors than requested.
    #[inline]
    pub fn embed_and_fit_batch(&self, texts: &[String]) -> Result<Vec<Result<Vec<f32>>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let raw = self
            .embedder
            .embed_batch(texts)
            .map_err(|e| StyleError::Embedding(format!("{:#}", e)))?;

        if raw.len() != texts.len() {
            return Err(StyleError::Embedding(format!(
                "model returned {} embeddings for {} texts",
                raw.len(),
                texts.len()
            )));
        }

        Ok(raw.iter().map(|vector| fit_embedding(vector)).collect())
    }
}
