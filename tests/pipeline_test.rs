use std::sync::{Arc, Mutex};

use actiontrack::{
    ActionClassifier, ActionPrediction, AnnotatedFrame, CancellationToken, Coordinator, Detection,
    Frame, FrameWindow, FusionConfig, IdentityFuser, IdentityRemap, IterSource, PipelineConfig,
    PredictionWorker, RenderSink, StopReason, TrackRecord, TrackSource, TrackedFrame, Visualizer,
    VisualizerError,
};
use actiontrack::{ConfigError, PipelineError};
use actiontrack::{AppearanceExtractor, Patch};
use ndarray::{Array2, Array3, s};

/// Labels every detection as waving.
struct WaveClassifier;

impl ActionClassifier for WaveClassifier {
    type Error = String;

    fn classify(
        &mut self,
        _frame: &Frame,
        detections: &[Detection],
    ) -> Result<ActionPrediction, Self::Error> {
        Ok(detections
            .iter()
            .fold(ActionPrediction::new(), |p, d| p.with_label(d.track_id, "wave", 0.9)))
    }
}

struct MeanIntensity;

impl AppearanceExtractor for MeanIntensity {
    type Error = std::convert::Infallible;

    fn extract(&mut self, patches: &[&Patch]) -> Result<Array2<f32>, Self::Error> {
        Ok(Array2::from_shape_fn((patches.len(), 1), |(i, _)| {
            patches[i].iter().map(|&v| v as f32).sum::<f32>() / patches[i].len() as f32
        }))
    }
}

/// Frame `i` of a clip where a bright person is tracked as id 1 for the first
/// half and as id 2 for the second half.
fn tracked(index: u64, total: u64) -> TrackedFrame {
    let mut pixels = Array3::<u8>::zeros((10, 20, 3));
    pixels.slice_mut(s![.., 0..10, ..]).fill(180);
    let frame = Frame::new(index, pixels);
    let id = if index < total / 2 { 1 } else { 2 };
    TrackedFrame::new(
        frame.clone(),
        frame,
        vec![Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, id)],
    )
}

fn clip(total: u64) -> IterSource<std::vec::IntoIter<TrackedFrame>> {
    IterSource::new((0..total).map(|i| tracked(i, total)).collect::<Vec<_>>())
}

fn config() -> PipelineConfig {
    PipelineConfig::batch()
        .with_queue_capacity(4)
        .with_prediction_interval(5)
        .with_drain_backoff_ms(1)
}

fn coordinator<S: TrackSource, V: Visualizer>(
    source: S,
    visualizer: V,
    config: PipelineConfig,
) -> Coordinator<S, MeanIntensity, V> {
    let predictor = PredictionWorker::spawn(
        WaveClassifier,
        config.queue_capacity,
        config.prediction_interval,
    )
    .unwrap();
    let fuser = IdentityFuser::new(MeanIntensity, &config.fusion);
    Coordinator::new(source, fuser, predictor, visualizer, config)
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Realtime(u64, bool),
    Track(u64),
    Prediction,
    Remap(IdentityRemap),
    EndTracks,
    EndStream,
    Render,
    Close,
}

/// Records every call; optionally refuses realtime frames after a count.
#[derive(Clone, Default)]
struct RecordingVisualizer {
    calls: Arc<Mutex<Vec<Call>>>,
    accept_frames: Option<usize>,
}

impl RecordingVisualizer {
    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|&c| f(c)).count()
    }
}

impl Visualizer for RecordingVisualizer {
    fn write_realtime(&mut self, tracked: &TrackedFrame, prediction: Option<ActionPrediction>) -> bool {
        let written = self.count(|c| matches!(c, Call::Realtime(..)));
        self.log(Call::Realtime(tracked.index(), prediction.is_some()));
        self.accept_frames.is_none_or(|n| written < n)
    }

    fn send_track(&mut self, record: TrackRecord) -> Result<(), VisualizerError> {
        self.log(Call::Track(record.index));
        Ok(())
    }

    fn send_prediction(&mut self, _prediction: ActionPrediction) -> Result<(), VisualizerError> {
        self.log(Call::Prediction);
        Ok(())
    }

    fn send_remap(&mut self, remap: IdentityRemap) -> Result<(), VisualizerError> {
        self.log(Call::Remap(remap));
        Ok(())
    }

    fn end_tracks(&mut self) -> Result<(), VisualizerError> {
        self.log(Call::EndTracks);
        Ok(())
    }

    fn end_stream(&mut self) -> Result<(), VisualizerError> {
        self.log(Call::EndStream);
        Ok(())
    }

    fn render(&mut self) -> Result<usize, VisualizerError> {
        self.log(Call::Render);
        Ok(self.count(|c| matches!(c, Call::Track(_))))
    }

    fn close(&mut self) -> Result<(), VisualizerError> {
        self.log(Call::Close);
        Ok(())
    }
}

#[test]
fn test_batch_protocol_order() {
    let vis = RecordingVisualizer::default();
    let summary = coordinator(clip(20), vis.clone(), config()).run().unwrap();

    assert_eq!(summary.stop, StopReason::EndOfStream);
    assert_eq!(summary.frames, 20);
    assert_eq!(summary.predictions, 4);
    assert_eq!(summary.rendered, 20);

    let calls = vis.calls();
    assert_eq!(vis.count(|c| *c == Call::EndStream), 1);
    assert_eq!(vis.count(|c| *c == Call::Render), 1);
    assert_eq!(vis.count(|c| *c == Call::Prediction), 4);
    assert_eq!(&calls[calls.len() - 3..], &[Call::EndStream, Call::Render, Call::Close]);

    let pos = |target: &Call| calls.iter().position(|c| c == target).unwrap();
    let last_track = calls.iter().rposition(|c| matches!(c, Call::Track(_))).unwrap();
    let remap = calls.iter().position(|c| matches!(c, Call::Remap(_))).unwrap();
    assert!(last_track < remap);
    assert!(remap < pos(&Call::EndTracks));
    assert!(pos(&Call::EndTracks) < pos(&Call::EndStream));

    // Predictions may arrive before or after the end of tracks, never after
    // the end of stream.
    let last_prediction = calls.iter().rposition(|c| *c == Call::Prediction).unwrap();
    assert!(last_prediction < pos(&Call::EndStream));
}

#[test]
fn test_batch_fuses_fragmented_identity() {
    let vis = RecordingVisualizer::default();
    let summary = coordinator(clip(30), vis.clone(), config()).run().unwrap();

    let groups = summary.fusion.unwrap();
    assert_eq!(groups.members(1), Some(&[1, 2][..]));

    let remap = vis
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Remap(r) => Some(r),
            _ => None,
        })
        .unwrap();
    assert_eq!(remap.resolve(2), 1);
}

#[test]
fn test_realtime_stops_when_visualizer_closes() {
    let vis = RecordingVisualizer {
        accept_frames: Some(3),
        ..RecordingVisualizer::default()
    };
    let config = PipelineConfig::realtime().with_prediction_interval(1);
    let summary = coordinator(clip(50), vis.clone(), config).run().unwrap();

    assert_eq!(summary.stop, StopReason::VisualizerClosed);
    assert_eq!(summary.frames, 4);
    assert!(summary.fusion.is_none());
    assert_eq!(vis.count(|c| matches!(c, Call::Realtime(..))), 4);
    assert_eq!(vis.count(|c| matches!(c, Call::Track(_) | Call::Render)), 0);
    assert_eq!(vis.calls().last(), Some(&Call::Close));
}

#[test]
fn test_realtime_runs_to_end_without_fusion() {
    let vis = RecordingVisualizer::default();
    let config = PipelineConfig::realtime().with_prediction_interval(1);
    let summary = coordinator(clip(10), vis.clone(), config).run().unwrap();

    assert_eq!(summary.stop, StopReason::EndOfStream);
    assert_eq!(summary.frames, 10);
    assert!(summary.fusion.is_none());
    assert_eq!(vis.count(|c| *c == Call::Render), 0);
}

#[test]
fn test_cancelled_before_start() {
    let vis = RecordingVisualizer::default();
    let coordinator = coordinator(clip(10), vis.clone(), config());
    coordinator.cancellation_token().cancel();
    let summary = coordinator.run().unwrap();

    assert_eq!(summary.stop, StopReason::Cancelled);
    assert_eq!(summary.frames, 0);
    // Whatever was collected is still rendered.
    assert_eq!(vis.count(|c| *c == Call::Render), 1);
}

/// Stands in for a user interrupt: cancels the run after handing out
/// `cancel_after` frames.
struct InterruptingSource {
    frames: IterSource<std::vec::IntoIter<TrackedFrame>>,
    token: CancellationToken,
    served: usize,
    cancel_after: usize,
}

impl TrackSource for InterruptingSource {
    type Error = std::convert::Infallible;

    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, Self::Error> {
        let next = self.frames.next_frame()?;
        self.served += 1;
        if self.served == self.cancel_after {
            self.token.cancel();
        }
        Ok(next)
    }
}

#[test]
fn test_cancelled_mid_stream_releases_workers() {
    let vis = RecordingVisualizer::default();
    let token = CancellationToken::new();
    let source = InterruptingSource {
        frames: clip(40),
        token: token.clone(),
        served: 0,
        cancel_after: 7,
    };
    let summary = coordinator(source, vis.clone(), config())
        .with_cancellation(token)
        .run()
        .unwrap();

    assert_eq!(summary.stop, StopReason::Cancelled);
    assert_eq!(summary.frames, 7);
    assert_eq!(summary.rendered, 7);
    assert!(summary.release_errors.is_empty());

    let calls = vis.calls();
    assert_eq!(vis.count(|c| matches!(c, Call::Track(_))), 7);
    assert_eq!(vis.count(|c| *c == Call::Render), 1);
    assert_eq!(&calls[calls.len() - 2..], &[Call::Render, Call::Close]);
}

fn single(index: u64, id: u64) -> TrackedFrame {
    let mut pixels = Array3::<u8>::zeros((10, 20, 3));
    pixels.slice_mut(s![.., 0..10, ..]).fill(90);
    let frame = Frame::new(index, pixels);
    TrackedFrame::new(
        frame.clone(),
        frame,
        vec![Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, id)],
    )
}

#[test]
fn test_repeated_frame_index_skips_fusion_only() {
    let mut frames: Vec<TrackedFrame> = (0..12).map(|i| single(i, 1)).collect();
    // The tracker re-emits index 11 under a fresh id.
    frames.push(single(11, 7));
    frames.push(single(12, 1));

    let vis = RecordingVisualizer::default();
    let summary = coordinator(IterSource::new(frames), vis.clone(), config())
        .run()
        .unwrap();

    assert_eq!(summary.stop, StopReason::EndOfStream);
    assert_eq!(summary.frames, 14);
    assert_eq!(summary.rendered, 14);
    assert_eq!(vis.count(|c| *c == Call::Track(11)), 2);

    let groups = summary.fusion.unwrap();
    assert_eq!(groups.members(1), Some(&[1][..]));
    assert!(groups.members(7).is_none());
    assert_eq!(groups.remap().get(7), None);
}

#[test]
fn test_frame_window() {
    let vis = RecordingVisualizer::default();
    let window = FrameWindow {
        start: 5,
        duration: Some(10),
    };
    let summary = coordinator(clip(30), vis.clone(), config().with_window(window))
        .run()
        .unwrap();

    assert_eq!(summary.stop, StopReason::WindowEnd);
    assert_eq!(summary.frames, 10);

    let tracks: Vec<u64> = vis
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Track(i) => Some(i),
            _ => None,
        })
        .collect();
    assert_eq!(tracks, (5..15).collect::<Vec<_>>());
}

/// Yields a few frames, then fails.
struct FailingSource {
    next: u64,
}

impl TrackSource for FailingSource {
    type Error = String;

    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, Self::Error> {
        if self.next == 3 {
            return Err("decoder lost sync".into());
        }
        self.next += 1;
        Ok(Some(tracked(self.next - 1, 100)))
    }
}

#[test]
fn test_source_failure_still_finalizes_batch() {
    let vis = RecordingVisualizer::default();
    let summary = coordinator(FailingSource { next: 0 }, vis.clone(), config())
        .run()
        .unwrap();

    assert!(matches!(summary.stop, StopReason::SourceFailed(ref e) if e.contains("sync")));
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.rendered, 3);
}

#[derive(Clone, Default)]
struct CollectSink {
    frames: Arc<Mutex<Vec<AnnotatedFrame>>>,
}

impl RenderSink for CollectSink {
    type Error = String;

    fn write(&mut self, frame: AnnotatedFrame) -> Result<(), Self::Error> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

#[test]
fn test_batch_end_to_end_with_worker() {
    let sink = CollectSink::default();
    let config = config().with_fusion(FusionConfig::default());
    let summary = Coordinator::spawn(clip(30), WaveClassifier, MeanIntensity, sink.clone(), config)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.rendered, 30);
    assert!(summary.release_errors.is_empty());

    let frames = sink.frames.lock().unwrap();
    assert_eq!(frames.len(), 30);
    assert!(frames.windows(2).all(|w| w[0].index < w[1].index));
    // The second half was tracked as id 2 but is drawn as id 1.
    assert!(frames.iter().all(|f| f.annotations[0].identity == 1));
    assert_eq!(frames[29].annotations[0].labels[0].name, "wave");
}

#[test]
fn test_spawn_rejects_invalid_config() {
    let config = config().with_prediction_interval(0);
    let result = Coordinator::spawn(
        clip(3),
        WaveClassifier,
        MeanIntensity,
        CollectSink::default(),
        config,
    );
    assert!(matches!(result, Err(PipelineError::Config(ConfigError::Invalid(_)))));
}
