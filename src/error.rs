//! Error types shared across the pipeline stages.

use thiserror::Error;

use crate::track::TrackId;

/// Errors raised while recording tracker output into the track buffer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("frame {got} recorded after frame {last}; frames must arrive in increasing order")]
    OutOfOrderFrame { last: u64, got: u64 },
}

/// Errors raised by the appearance comparator and the identity fuser.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("embedding failed for track {track_id}: {reason}")]
    EmbeddingFailure { track_id: TrackId, reason: String },

    #[error("embedding width mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

impl FusionError {
    pub fn embedding<S: Into<String>>(track_id: TrackId, reason: S) -> Self {
        Self::EmbeddingFailure {
            track_id,
            reason: reason.into(),
        }
    }
}

/// Errors raised when talking to, or shutting down, a worker thread.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    #[error("{0} worker input queue is closed")]
    Disconnected(&'static str),

    #[error("{0} worker panicked")]
    Panicked(&'static str),

    #[error("failed to spawn {name} worker: {reason}")]
    Spawn { name: &'static str, reason: String },
}

/// Errors raised by the visualizer and its output sink.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VisualizerError {
    #[error("visualizer is closed")]
    Closed,

    #[error("render requested before end of stream")]
    NotFinished,

    #[error("output sink failed: {0}")]
    Sink(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Errors raised while loading pipeline configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level error for a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Visualizer(#[from] VisualizerError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
