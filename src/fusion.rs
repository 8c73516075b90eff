//! Appearance-based reconciliation of short-term track ids.

mod comparator;
mod fuser;

pub use comparator::{
    AppearanceExtractor, ColorHistogramExtractor, DistanceMetric, FeatureComparator,
    min_distance, pairwise_distance,
};
pub use fuser::{FusionGroups, IdentityFuser, IdentityRemap};
