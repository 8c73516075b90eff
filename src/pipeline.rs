//! Concurrent stages of a pipeline run and the coordinator tying them together.
//!
//! The coordinator pulls tracked frames from a [`TrackSource`], feeds a
//! [`PredictionWorker`] and a [`Visualizer`], and in batch mode reconciles
//! track identities with an [`IdentityFuser`](crate::fusion::IdentityFuser)
//! before the final render.

mod cancel;
mod coordinator;
mod predictor;
mod render;
mod source;
mod visualizer;

pub use cancel::CancellationToken;
pub use coordinator::{Coordinator, RunSummary, StopReason};
pub use predictor::{
    ActionClassifier, ActionLabel, ActionPrediction, Poll, PredictionRequest, PredictionWorker,
    Submit,
};
pub use render::{
    AnnotatedFrame, Annotation, BatchRenderer, RealtimeAnnotator, RenderSink, TrackRecord,
};
pub use source::{IterSource, TrackSource};
pub use visualizer::{Visualizer, VisualizerWorker};
