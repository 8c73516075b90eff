//! Appearance embedding and pairwise distances between tracks.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FusionError;
use crate::track::{Patch, TrackId};

/// Trait for re-identification feature extractors.
///
/// Implement this to plug an appearance model into the fuser. The returned
/// matrix has one row per input patch.
pub trait AppearanceExtractor {
    /// Error type for extraction failures.
    type Error: std::fmt::Display;

    fn extract(&mut self, patches: &[&Patch]) -> Result<Array2<f32>, Self::Error>;
}

/// Distance between embeddings. Lower means more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `|a - b|^2`, unnormalized.
    #[default]
    SquaredEuclidean,
    /// `1 - cos(a, b)`.
    Cosine,
}

/// Compute the distance matrix between the rows of `a` and the rows of `b`.
///
/// Both inputs must have the same width.
pub fn pairwise_distance(a: &Array2<f32>, b: &Array2<f32>, metric: DistanceMetric) -> Array2<f32> {
    let ab = a.dot(&b.t());
    match metric {
        DistanceMetric::SquaredEuclidean => {
            let a_sq = row_dots(a);
            let b_sq = row_dots(b);
            Array2::from_shape_fn(ab.dim(), |(i, j)| {
                (a_sq[i] + b_sq[j] - 2.0 * ab[[i, j]]).max(0.0)
            })
        }
        DistanceMetric::Cosine => {
            let a_norm = row_dots(a).mapv(f32::sqrt);
            let b_norm = row_dots(b).mapv(f32::sqrt);
            Array2::from_shape_fn(ab.dim(), |(i, j)| {
                let denom = a_norm[i] * b_norm[j];
                let sim = if denom > 0.0 { ab[[i, j]] / denom } else { 0.0 };
                1.0 - sim
            })
        }
    }
}

fn row_dots(m: &Array2<f32>) -> Array1<f32> {
    m.map_axis(Axis(1), |row| row.dot(&row))
}

/// Smallest entry of a distance matrix, `None` when it is empty.
pub fn min_distance(dists: &Array2<f32>) -> Option<f32> {
    dists
        .iter()
        .copied()
        .filter(|d| !d.is_nan())
        .fold(None, |acc, d| Some(acc.map_or(d, |m: f32| m.min(d))))
}

/// Wraps an appearance extractor with a distance metric.
pub struct FeatureComparator<E> {
    extractor: E,
    metric: DistanceMetric,
}

impl<E: AppearanceExtractor> FeatureComparator<E> {
    pub fn new(extractor: E, metric: DistanceMetric) -> Self {
        Self { extractor, metric }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn extractor_mut(&mut self) -> &mut E {
        &mut self.extractor
    }

    /// Embed the patches of one track.
    ///
    /// Zero-sized patches are dropped first. Fails when nothing usable is
    /// left or the extractor cannot produce one row per patch.
    pub fn embed(&mut self, track_id: TrackId, patches: &[&Patch]) -> Result<Array2<f32>, FusionError> {
        let usable: Vec<&Patch> = patches.iter().copied().filter(|p| !p.is_empty()).collect();
        if usable.is_empty() {
            return Err(FusionError::embedding(track_id, "no usable patches"));
        }

        let feats = self
            .extractor
            .extract(&usable)
            .map_err(|e| FusionError::embedding(track_id, e.to_string()))?;

        let (rows, cols) = feats.dim();
        if rows != usable.len() || cols == 0 {
            return Err(FusionError::embedding(
                track_id,
                format!("extractor returned {rows}x{cols} for {} patches", usable.len()),
            ));
        }
        debug!(track_id, patches = rows, dim = cols, "embedded track");
        Ok(feats)
    }

    /// Pairwise distances between two embedding sets.
    pub fn distance(&self, a: &Array2<f32>, b: &Array2<f32>) -> Result<Array2<f32>, FusionError> {
        if a.ncols() != b.ncols() {
            return Err(FusionError::DimensionMismatch {
                left: a.ncols(),
                right: b.ncols(),
            });
        }
        Ok(pairwise_distance(a, b, self.metric))
    }
}

/// Per-patch color histogram features.
///
/// A model-free extractor: each patch becomes the normalized histogram of its
/// first three channels, `bins` buckets per channel. Distances are small
/// (squared Euclidean is at most 6), so pair it with a matching threshold.
#[derive(Debug, Clone)]
pub struct ColorHistogramExtractor {
    bins: usize,
}

impl Default for ColorHistogramExtractor {
    fn default() -> Self {
        Self::new(8)
    }
}

impl ColorHistogramExtractor {
    pub fn new(bins: usize) -> Self {
        Self { bins: bins.clamp(1, 256) }
    }

    fn histogram(&self, patch: &Patch) -> Vec<f32> {
        let (h, w, c) = patch.dim();
        let mut hist = vec![0.0f32; 3 * self.bins];
        let pixels = (h * w) as f32;
        if pixels == 0.0 {
            return hist;
        }
        for ch in 0..c.min(3) {
            for &v in patch.index_axis(Axis(2), ch).iter() {
                let bin = v as usize * self.bins / 256;
                hist[ch * self.bins + bin] += 1.0;
            }
        }
        hist.iter_mut().for_each(|v| *v /= pixels);
        hist
    }
}

impl AppearanceExtractor for ColorHistogramExtractor {
    type Error = std::convert::Infallible;

    fn extract(&mut self, patches: &[&Patch]) -> Result<Array2<f32>, Self::Error> {
        let dim = 3 * self.bins;
        let mut feats = Array2::zeros((patches.len(), dim));
        for (i, patch) in patches.iter().enumerate() {
            for (j, v) in self.histogram(patch).into_iter().enumerate() {
                feats[[i, j]] = v;
            }
        }
        Ok(feats)
    }
}
