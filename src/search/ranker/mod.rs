//! Turns raw neighbor lists into the response shape: metadata attached,
//! duplicate images removed, length capped.


use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::index::Neighbor;
use crate::store::VectorStore;

/// Final results as parallel sequences, best match first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResults {
    pub distances: Vec<f32>,
    #[serde(rename = "indices")]
    pub positions: Vec<usize>,
    pub slugs: Vec<String>,
    #[serde(rename = "img_urls")]
    pub image_urls: Vec<String>,
    #[serde(rename = "desc")]
    pub descriptions: Vec<String>,
}

impl RankedResults {
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn push(&mut self, distance: f32, position: usize, slug: &str, image_url: &str, desc: &str) {
        self.distances.push(distance);
        self.positions.push(position);
        self.slugs.push(slug.to_string());
        self.image_urls.push(image_url.to_string());
        self.descriptions.push(desc.to_string());
    }
}

/// Attach metadata to `neighbors`, keep the first hit per image URL and cap
/// the output at `max_results`.
///
/// Deduplication happens before truncation, so up to `max_results` distinct
/// images are returned whenever the neighbor list contains that many.
#[inline]
pub fn finalize(neighbors: &[Neighbor], store: &VectorStore, max_results: usize) -> RankedResults {
    let mut results = RankedResults::default();

    let hits = neighbors.iter().filter_map(|neighbor| {
        let position = neighbor.position;
        match (
            store.slug_at(position),
            store.image_url_at(position),
            store.description_at(position),
        ) {
            (Some(slug), Some(image_url), Some(desc)) => {
                Some((neighbor.distance, position, slug, image_url, desc))
            }
            _ => {
                warn!(
                    "Neighbor position {} is outside the catalog of {} entries",
                    position,
                    store.size()
                );
                None
            }
        }
    });

    for (distance, position, slug, image_url, desc) in hits
        .unique_by(|&(_, _, _, image_url, _)| image_url)
        .take(max_results)
    {
        results.push(distance, position, slug, image_url, desc);
    }

    results
}
