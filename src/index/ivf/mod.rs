//! Inverted-file clustering for approximate search.
//!
//! Vectors are partitioned with k-means; a query only scans the members of
//! the `nprobe` clusters whose centroids are nearest to it. Training is
//! deterministic (evenly spaced seeds, fixed iteration cap) so a rebuild over
//! the same vectors reproduces the same index.


use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Neighbor, squared_l2, top_k};
use crate::{Result, StyleError};

const MAX_TRAINING_ITERATIONS: usize = 25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfClusters {
    dimension: usize,
    nprobe: usize,
    /// Row-major `nlist × dimension` matrix
    centroids: Vec<f32>,
    /// Positions assigned to each centroid, ascending
    lists: Vec<Vec<usize>>,
}

impl IvfClusters {
    /// Partition the row-major `vectors` matrix into at most `nlist` clusters.
    ///
    /// `nlist` is clamped to the number of vectors and `nprobe` to `nlist`.
    #[inline]
    pub fn train(vectors: &[f32], dimension: usize, nlist: usize, nprobe: usize) -> Self {
        let count = vectors.len() / dimension;
        if count == 0 {
            return Self {
                dimension,
                nprobe: 0,
                centroids: Vec::new(),
                lists: Vec::new(),
            };
        }
        let nlist = nlist.clamp(1, count);
        let nprobe = nprobe.clamp(1, nlist);

        let mut centroids: Vec<f32> = (0..nlist)
            .flat_map(|cluster| row(vectors, dimension, cluster * count / nlist).iter().copied())
            .collect();

        let mut assignments = assign_all(vectors, &centroids, dimension);
        for iteration in 1..=MAX_TRAINING_ITERATIONS {
            update_centroids(&mut centroids, vectors, &assignments, dimension);
            let next = assign_all(vectors, &centroids, dimension);
            if next == assignments {
                debug!("k-means converged after {} iterations", iteration);
                break;
            }
            assignments = next;
        }

        let mut lists = vec![Vec::new(); nlist];
        for (position, cluster) in assignments.into_iter().enumerate() {
            lists[cluster].push(position);
        }

        debug!(
            "Trained IVF clusters: nlist={}, nprobe={}, largest list={}",
            nlist,
            nprobe,
            lists.iter().map(Vec::len).max().unwrap_or(0)
        );

        Self {
            dimension,
            nprobe,
            centroids,
            lists,
        }
    }

    #[inline]
    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    /// Positions stored in the clusters probed for `query`
    #[inline]
    pub fn candidates(&self, query: &[f32]) -> impl Iterator<Item = usize> {
        self.probe_order(query)
            .into_iter()
            .flat_map(move |cluster| self.lists[cluster].iter().copied())
    }

    /// The `nprobe` clusters nearest to `query`, nearest first
    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let scored = (0..self.nlist())
            .map(|cluster| {
                Neighbor::new(
                    squared_l2(query, row(&self.centroids, self.dimension, cluster)),
                    cluster,
                )
            })
            .collect();

        top_k(scored, self.nprobe)
            .into_iter()
            .map(|n| n.position)
            .collect()
    }

    pub(crate) fn check_consistency(&self, dimension: usize, count: usize) -> Result<()> {
        let invalid = |reason: String| Err(StyleError::Dimension(reason));

        if self.dimension != dimension {
            return invalid(format!(
                "cluster dimension {} differs from index dimension {}",
                self.dimension, dimension
            ));
        }
        if self.lists.is_empty() || self.centroids.len() != self.lists.len() * dimension {
            return invalid("centroid matrix does not match the cluster count".to_string());
        }
        if self.nprobe == 0 || self.nprobe > self.lists.len() {
            return invalid(format!("nprobe {} is out of range", self.nprobe));
        }

        let mut seen = vec![false; count];
        for &position in self.lists.iter().flatten() {
            match seen.get_mut(position) {
                Some(slot) if !*slot => *slot = true,
                _ => return invalid(format!("position {} is missing or repeated", position)),
            }
        }
        if seen.iter().any(|assigned| !assigned) {
            return invalid("some positions are not assigned to a cluster".to_string());
        }

        Ok(())
    }
}

fn row(matrix: &[f32], dimension: usize, index: usize) -> &[f32] {
    &matrix[index * dimension..(index + 1) * dimension]
}

fn nearest_centroid(centroids: &[f32], dimension: usize, vector: &[f32]) -> usize {
    let nlist = centroids.len() / dimension;
    (0..nlist)
        .map(|cluster| Neighbor::new(squared_l2(vector, row(centroids, dimension, cluster)), cluster))
        .min_by(Neighbor::ranking_cmp)
        .map_or(0, |n| n.position)
}

fn assign_all(vectors: &[f32], centroids: &[f32], dimension: usize) -> Vec<usize> {
    vectors
        .chunks_exact(dimension)
        .map(|vector| nearest_centroid(centroids, dimension, vector))
        .collect()
}

/// Move every non-empty cluster's centroid to the mean of its members.
/// Empty clusters keep their previous centroid.
fn update_centroids(centroids: &mut [f32], vectors: &[f32], assignments: &[usize], dimension: usize) {
    let nlist = centroids.len() / dimension;
    let mut sums = vec![0.0_f64; centroids.len()];
    let mut sizes = vec![0_usize; nlist];

    for (vector, &cluster) in vectors.chunks_exact(dimension).zip(assignments) {
        sizes[cluster] += 1;
        let start = cluster * dimension;
        for (sum, value) in sums[start..start + dimension].iter_mut().zip(vector) {
            *sum += f64::from(*value);
        }
    }

    for (cluster, &size) in sizes.iter().enumerate() {
        if size == 0 {
            continue;
        }
        let start = cluster * dimension;
        for (centroid, sum) in centroids[start..start + dimension]
            .iter_mut()
            .zip(&sums[start..start + dimension])
        {
            *centroid = (sum / size as f64) as f32;
        }
    }
}
