//! Main loop driving tracker output through prediction, fusion and rendering.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, PipelineMode};
use crate::error::{Result, VisualizerError};
use crate::fusion::{AppearanceExtractor, FusionGroups, IdentityFuser};
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::predictor::{
    ActionClassifier, Poll, PredictionRequest, PredictionWorker, Submit,
};
use crate::pipeline::render::{RenderSink, TrackRecord};
use crate::pipeline::source::TrackSource;
use crate::pipeline::visualizer::{Visualizer, VisualizerWorker};
use crate::track::{TrackBuffer, TrackedFrame};

/// Wait between retries while the prediction input queue is full.
const SUBMIT_BACKOFF: Duration = Duration::from_millis(2);

/// Why the main loop ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StopReason {
    #[default]
    EndOfStream,
    /// The configured frame window was exhausted.
    WindowEnd,
    Cancelled,
    /// The visualizer stopped accepting frames.
    VisualizerClosed,
    SourceFailed(String),
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Frames processed inside the window.
    pub frames: usize,
    /// Predictions forwarded to the visualizer.
    pub predictions: usize,
    /// Detections skipped by the track buffer.
    pub malformed: usize,
    pub stop: StopReason,
    /// Batch mode only.
    pub fusion: Option<FusionGroups>,
    /// Frames written by the final render.
    pub rendered: usize,
    /// Failures while shutting workers down. These never fail the run.
    pub release_errors: Vec<String>,
}

/// Owns the stages of one pipeline run.
///
/// The coordinator loop is single-threaded: it pulls tracker output, hands it
/// to the prediction worker and the visualizer, and collects ready
/// predictions without waiting. Only after the stream ends does it block on
/// the prediction worker.
pub struct Coordinator<S, E, V> {
    source: S,
    fuser: IdentityFuser<E>,
    predictor: PredictionWorker,
    visualizer: V,
    config: PipelineConfig,
    cancel: CancellationToken,
    predictions_done: bool,
}

impl<S, E> Coordinator<S, E, VisualizerWorker>
where
    S: TrackSource,
    E: AppearanceExtractor,
{
    /// Validate `config` and start the prediction and visualizer workers.
    pub fn spawn<C, R>(
        source: S,
        classifier: C,
        extractor: E,
        sink: R,
        config: PipelineConfig,
    ) -> Result<Self>
    where
        C: ActionClassifier + Send + 'static,
        R: RenderSink + Send + 'static,
    {
        config.validate()?;
        let predictor = PredictionWorker::spawn(
            classifier,
            config.queue_capacity,
            config.prediction_interval,
        )?;
        let visualizer = VisualizerWorker::spawn(sink, &config)?;
        let fuser = IdentityFuser::new(extractor, &config.fusion);
        Ok(Self::new(source, fuser, predictor, visualizer, config))
    }
}

impl<S, E, V> Coordinator<S, E, V>
where
    S: TrackSource,
    E: AppearanceExtractor,
    V: Visualizer,
{
    pub fn new(
        source: S,
        fuser: IdentityFuser<E>,
        predictor: PredictionWorker,
        visualizer: V,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            fuser,
            predictor,
            visualizer,
            config,
            cancel: CancellationToken::new(),
            predictions_done: false,
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run to completion and release every worker.
    ///
    /// An error means the batch finalization could not reach the output;
    /// workers are released either way.
    pub fn run(mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        info!(mode = ?self.config.mode, "pipeline started");

        let outcome = match self.config.mode {
            PipelineMode::Realtime => {
                self.run_realtime(&mut summary);
                Ok(())
            }
            PipelineMode::Batch => self.run_batch(&mut summary),
        };

        self.release(&mut summary);
        info!(
            frames = summary.frames,
            predictions = summary.predictions,
            rendered = summary.rendered,
            stop = ?summary.stop,
            "pipeline finished"
        );
        outcome.map(|()| summary)
    }

    /// Pull the next in-window frame.
    fn next_frame(&mut self, position: &mut u64) -> std::result::Result<TrackedFrame, StopReason> {
        loop {
            if self.cancel.is_cancelled() {
                info!("cancelled, leaving main loop");
                return Err(StopReason::Cancelled);
            }
            if self.config.window.after(*position) {
                return Err(StopReason::WindowEnd);
            }

            let tracked = match self.source.next_frame() {
                Ok(Some(tracked)) => tracked,
                Ok(None) => return Err(StopReason::EndOfStream),
                Err(e) => {
                    error!(error = %e, "track source failed");
                    return Err(StopReason::SourceFailed(e.to_string()));
                }
            };

            let pos = *position;
            *position += 1;
            if self.config.window.before(pos) {
                continue;
            }
            return Ok(tracked);
        }
    }

    fn run_realtime(&mut self, summary: &mut RunSummary) {
        let mut position = 0;
        loop {
            let tracked = match self.next_frame(&mut position) {
                Ok(t) => t,
                Err(stop) => {
                    summary.stop = stop;
                    break;
                }
            };
            summary.frames += 1;

            let request = PredictionRequest::new(tracked.frame.clone(), tracked.detections.clone());
            match self.predictor.try_submit(request) {
                Ok(Submit::Accepted) => {}
                Ok(Submit::Full(_)) => debug!(frame = tracked.index(), "predictor busy, frame not classified"),
                Err(e) => debug!(error = %e, "predictor unavailable"),
            }

            let prediction = match self.predictor.poll() {
                Poll::Ready(p) => {
                    summary.predictions += 1;
                    Some(p)
                }
                Poll::Pending | Poll::Completed => None,
            };

            if !self.visualizer.write_realtime(&tracked, prediction) {
                warn!(frame = tracked.index(), "visualizer closed, stopping");
                summary.stop = StopReason::VisualizerClosed;
                break;
            }
        }
    }

    fn run_batch(&mut self, summary: &mut RunSummary) -> Result<()> {
        let mut buffer = TrackBuffer::with_patch_cap(self.config.fusion.max_patches_per_track);
        let mut position = 0;

        loop {
            let tracked = match self.next_frame(&mut position) {
                Ok(t) => t,
                Err(stop) => {
                    summary.stop = stop;
                    break;
                }
            };
            summary.frames += 1;

            match buffer.record(&tracked.frame, &tracked.detections) {
                Ok(report) => summary.malformed += report.malformed.len(),
                Err(e) => warn!(error = %e, "frame not recorded for fusion"),
            }

            let step = self
                .visualizer
                .send_track(TrackRecord::from(&tracked))
                .and_then(|()| {
                    let request = PredictionRequest::new(tracked.frame, tracked.detections);
                    self.submit(request, summary)
                })
                .and_then(|()| self.drain_ready(summary));
            if let Err(e) = step {
                error!(error = %e, "visualizer unavailable, stopping");
                summary.stop = StopReason::VisualizerClosed;
                break;
            }
        }

        if summary.stop == StopReason::VisualizerClosed {
            warn!("skipping fusion, nothing left to render to");
            return Ok(());
        }
        self.finalize_batch(&buffer, summary)
    }

    /// Queue a request for classification, draining output while the input
    /// queue is full so neither side can stall the other.
    fn submit(
        &mut self,
        request: PredictionRequest,
        summary: &mut RunSummary,
    ) -> std::result::Result<(), VisualizerError> {
        let mut request = request;
        loop {
            match self.predictor.try_submit(request) {
                Ok(Submit::Accepted) => return Ok(()),
                Ok(Submit::Full(back)) => {
                    request = back;
                    if self.drain_ready(summary)? == 0 {
                        thread::sleep(SUBMIT_BACKOFF);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "prediction worker gone, frame not classified");
                    return Ok(());
                }
            }
        }
    }

    /// Forward every prediction that is ready now. Returns how many were forwarded.
    fn drain_ready(&mut self, summary: &mut RunSummary) -> std::result::Result<usize, VisualizerError> {
        let mut forwarded = 0;
        while !self.predictions_done {
            match self.predictor.poll() {
                Poll::Pending => break,
                Poll::Ready(p) => {
                    self.visualizer.send_prediction(p)?;
                    summary.predictions += 1;
                    forwarded += 1;
                }
                Poll::Completed => {
                    debug!("prediction worker completed");
                    self.predictions_done = true;
                }
            }
        }
        Ok(forwarded)
    }

    fn finalize_batch(&mut self, buffer: &TrackBuffer, summary: &mut RunSummary) -> Result<()> {
        self.predictor.finish();

        let groups = self.fuser.fuse(buffer);
        let remap = groups.remap();
        info!(
            tracks = remap.len(),
            identities = groups.len(),
            "identity fusion done"
        );
        summary.fusion = Some(groups);

        self.visualizer.send_remap(remap)?;
        self.visualizer.end_tracks()?;

        let backoff = Duration::from_millis(self.config.drain_backoff_ms);
        while !self.predictions_done {
            if self.drain_ready(summary)? == 0 && !self.predictions_done {
                thread::sleep(backoff);
            }
        }

        self.visualizer.end_stream()?;
        summary.rendered = self.visualizer.render()?;
        Ok(())
    }

    fn release(&mut self, summary: &mut RunSummary) {
        if let Err(e) = self.predictor.terminate() {
            warn!(error = %e, "failed to stop prediction worker");
            summary.release_errors.push(e.to_string());
        }
        if let Err(e) = self.visualizer.close() {
            warn!(error = %e, "failed to close visualizer");
            summary.release_errors.push(e.to_string());
        }
    }
}
