//! Tunables for fusion and for the pipeline run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fusion::DistanceMetric;

/// Configuration for the identity fuser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Ids with fewer observations than this never attempt a merge.
    pub min_observations: usize,
    /// Merge when the closest candidate is strictly below this distance.
    pub merge_threshold: f32,
    pub metric: DistanceMetric,
    /// Rolling cap on stored patches per id. `None` keeps everything.
    pub max_patches_per_track: Option<usize>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_observations: 10,
            merge_threshold: 500.0,
            metric: DistanceMetric::SquaredEuclidean,
            max_patches_per_track: None,
        }
    }
}

impl FusionConfig {
    pub fn with_min_observations(mut self, min_observations: usize) -> Self {
        self.min_observations = min_observations;
        self
    }

    pub fn with_merge_threshold(mut self, threshold: f32) -> Self {
        self.merge_threshold = threshold;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_patch_cap(mut self, cap: Option<usize>) -> Self {
        self.max_patches_per_track = cap;
        self
    }
}

/// How the coordinator treats the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Render every frame as it arrives. No identity fusion.
    Realtime,
    /// Buffer the whole stream, fuse identities, then render.
    #[default]
    Batch,
}

/// Portion of the stream to process, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameWindow {
    /// Frames before this position are skipped.
    pub start: u64,
    /// Stop after this many frames. `None` runs to the end of the stream.
    pub duration: Option<u64>,
}

impl FrameWindow {
    /// Whether the frame at stream position `pos` should be skipped.
    pub fn before(&self, pos: u64) -> bool {
        pos < self.start
    }

    /// Whether the frame at stream position `pos` is past the window.
    pub fn after(&self, pos: u64) -> bool {
        self.duration
            .is_some_and(|d| pos >= self.start.saturating_add(d))
    }
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// Capacity of every bounded queue between stages.
    pub queue_capacity: usize,
    /// Classify every n-th frame.
    pub prediction_interval: usize,
    /// Action labels below this score are not drawn.
    pub visual_threshold: f32,
    /// Sleep between polls while draining the prediction worker after the stream ends.
    pub drain_backoff_ms: u64,
    pub window: FrameWindow,
    pub fusion: FusionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Batch,
            queue_capacity: 32,
            prediction_interval: 8,
            visual_threshold: 0.5,
            drain_backoff_ms: 100,
            window: FrameWindow::default(),
            fusion: FusionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn realtime() -> Self {
        Self {
            mode: PipelineMode::Realtime,
            ..Self::default()
        }
    }

    pub fn batch() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_prediction_interval(mut self, interval: usize) -> Self {
        self.prediction_interval = interval;
        self
    }

    pub fn with_visual_threshold(mut self, threshold: f32) -> Self {
        self.visual_threshold = threshold;
        self
    }

    pub fn with_drain_backoff_ms(mut self, ms: u64) -> Self {
        self.drain_backoff_ms = ms;
        self
    }

    pub fn with_window(mut self, window: FrameWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        if self.prediction_interval == 0 {
            return Err(ConfigError::Invalid(
                "prediction_interval must be positive".into(),
            ));
        }
        if !self.fusion.merge_threshold.is_finite() {
            return Err(ConfigError::Invalid("merge_threshold must be finite".into()));
        }
        Ok(())
    }
}
