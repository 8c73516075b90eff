//! Visualizer interface and its threaded implementation.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{VisualizerError, WorkerError};
use crate::fusion::IdentityRemap;
use crate::pipeline::predictor::ActionPrediction;
use crate::pipeline::render::{BatchRenderer, RealtimeAnnotator, RenderSink, TrackRecord};
use crate::track::TrackedFrame;

const WORKER_NAME: &str = "visualizer";

/// The rendering stage as seen by the coordinator.
///
/// Realtime runs only call [`Visualizer::write_realtime`]. Batch runs send
/// track records and predictions as they arrive, then the remap, the two end
/// markers, and finally trigger [`Visualizer::render`].
pub trait Visualizer {
    /// Render a frame immediately. Returns `false` once the output can no
    /// longer accept frames.
    fn write_realtime(&mut self, tracked: &TrackedFrame, prediction: Option<ActionPrediction>) -> bool;

    fn send_track(&mut self, record: TrackRecord) -> Result<(), VisualizerError>;

    fn send_prediction(&mut self, prediction: ActionPrediction) -> Result<(), VisualizerError>;

    fn send_remap(&mut self, remap: IdentityRemap) -> Result<(), VisualizerError>;

    /// No more track records will follow.
    fn end_tracks(&mut self) -> Result<(), VisualizerError>;

    /// No more predictions will follow.
    fn end_stream(&mut self) -> Result<(), VisualizerError>;

    /// Render the buffered stream. Returns the number of frames written.
    fn render(&mut self) -> Result<usize, VisualizerError>;

    /// Flush the output and release the stage.
    fn close(&mut self) -> Result<(), VisualizerError>;
}

enum Message {
    Realtime(TrackedFrame, Option<ActionPrediction>),
    Track(TrackRecord),
    Prediction(ActionPrediction),
    Remap(IdentityRemap),
    EndOfTracks,
    EndOfStream,
    Render(Sender<Result<usize, VisualizerError>>),
}

/// Runs a [`RenderSink`] on its own thread behind a bounded queue.
///
/// A sink failure stops the worker; every later call then reports the
/// visualizer as closed.
pub struct VisualizerWorker {
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<Result<(), VisualizerError>>>,
}

impl VisualizerWorker {
    pub fn spawn<S>(sink: S, config: &PipelineConfig) -> Result<Self, WorkerError>
    where
        S: RenderSink + Send + 'static,
    {
        let (tx, rx) = bounded::<Message>(config.queue_capacity.max(1));
        let interval = config.prediction_interval;
        let threshold = config.visual_threshold;

        let handle = thread::Builder::new()
            .name("visualizer".into())
            .spawn(move || {
                let mut sink = sink;
                let mut live = RealtimeAnnotator::new(threshold);
                let mut batch = BatchRenderer::new(interval, threshold);
                info!("visualizer worker started");

                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Realtime(tracked, prediction) => {
                            let frame = live.annotate(&tracked, prediction);
                            if let Err(e) = sink.write(frame) {
                                error!(error = %e, "output rejected frame, stopping visualizer");
                                return Err(VisualizerError::Sink(e.to_string()));
                            }
                        }
                        Message::Track(record) => batch.push_track(record),
                        Message::Prediction(prediction) => batch.push_prediction(prediction),
                        Message::Remap(remap) => batch.set_remap(remap),
                        Message::EndOfTracks => batch.end_tracks(),
                        Message::EndOfStream => batch.end_stream(),
                        Message::Render(reply) => {
                            info!(frames = batch.pending_frames(), "rendering buffered stream");
                            let result = batch.render(&mut sink);
                            let _ = reply.send(result.clone());
                            if let Err(e @ VisualizerError::Sink(_)) = result {
                                error!(error = %e, "render failed, stopping visualizer");
                                return Err(e);
                            }
                        }
                    }
                }

                info!("visualizer worker finished");
                sink.finish()
                    .map_err(|e| VisualizerError::Sink(e.to_string()))
            })
            .map_err(|e| WorkerError::Spawn {
                name: WORKER_NAME,
                reason: e.to_string(),
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn send(&self, message: Message) -> Result<(), VisualizerError> {
        let tx = self.tx.as_ref().ok_or(VisualizerError::Closed)?;
        tx.send(message).map_err(|_| VisualizerError::Closed)
    }
}

impl Visualizer for VisualizerWorker {
    fn write_realtime(&mut self, tracked: &TrackedFrame, prediction: Option<ActionPrediction>) -> bool {
        self.send(Message::Realtime(tracked.clone(), prediction)).is_ok()
    }

    fn send_track(&mut self, record: TrackRecord) -> Result<(), VisualizerError> {
        self.send(Message::Track(record))
    }

    fn send_prediction(&mut self, prediction: ActionPrediction) -> Result<(), VisualizerError> {
        self.send(Message::Prediction(prediction))
    }

    fn send_remap(&mut self, remap: IdentityRemap) -> Result<(), VisualizerError> {
        self.send(Message::Remap(remap))
    }

    fn end_tracks(&mut self) -> Result<(), VisualizerError> {
        self.send(Message::EndOfTracks)
    }

    fn end_stream(&mut self) -> Result<(), VisualizerError> {
        self.send(Message::EndOfStream)
    }

    fn render(&mut self) -> Result<usize, VisualizerError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Message::Render(reply_tx))?;
        reply_rx.recv().map_err(|_| VisualizerError::Closed)?
    }

    fn close(&mut self) -> Result<(), VisualizerError> {
        self.tx.take();
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => {
                    warn!("visualizer worker panicked");
                    Err(WorkerError::Panicked(WORKER_NAME).into())
                }
            },
            None => Ok(()),
        }
    }
}
