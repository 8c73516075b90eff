//! Action detection over tracked video with post-hoc identity fusion.
//!
//! A [`Coordinator`] drives tracker output through an action classifier
//! running on its own thread and a visualizer running on another. In realtime
//! mode frames are annotated as they arrive; in batch mode the whole stream
//! is buffered, fragmented track ids are merged by appearance with an
//! [`IdentityFuser`], and the video is rendered once with stable identities.

pub mod config;
pub mod error;
pub mod fusion;
pub mod pipeline;
pub mod track;

pub use config::{FrameWindow, FusionConfig, PipelineConfig, PipelineMode};
pub use error::{
    BufferError, ConfigError, FusionError, PipelineError, Result, VisualizerError, WorkerError,
};
pub use fusion::{
    AppearanceExtractor, ColorHistogramExtractor, DistanceMetric, FeatureComparator,
    FusionGroups, IdentityFuser, IdentityRemap,
};
pub use pipeline::{
    ActionClassifier, ActionLabel, ActionPrediction, AnnotatedFrame, Annotation,
    CancellationToken, Coordinator, IterSource, PredictionRequest, PredictionWorker, RenderSink,
    RunSummary, StopReason, TrackRecord, TrackSource, Visualizer, VisualizerWorker,
};
pub use track::{
    BoxFormat, Detection, DetectionBuilder, Frame, Patch, Rect, TrackBuffer, TrackId, TrackedFrame,
};
