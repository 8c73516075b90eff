//! Turning tracks and predictions into annotated frames.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::error::VisualizerError;
use crate::fusion::IdentityRemap;
use crate::pipeline::predictor::{ActionLabel, ActionPrediction};
use crate::track::{Detection, Frame, Rect, TrackId, TrackedFrame};

/// One box to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub bbox: Rect,
    pub score: f32,
    /// Long-term id in batch mode, tracker id in realtime mode.
    pub identity: TrackId,
    pub labels: Vec<ActionLabel>,
}

/// A frame ready for output.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub index: u64,
    /// Pixels to draw on. Batch rendering carries only indices; the sink
    /// re-reads the source for pixels.
    pub frame: Option<Frame>,
    pub annotations: Vec<Annotation>,
}

/// Trait for annotated frame outputs (video writers, displays).
pub trait RenderSink {
    /// Error type for output failures.
    type Error: std::fmt::Display;

    fn write(&mut self, frame: AnnotatedFrame) -> Result<(), Self::Error>;

    /// Flush and release the output.
    fn finish(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Tracker output for one frame, without pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub index: u64,
    pub detections: Vec<Detection>,
}

impl From<&TrackedFrame> for TrackRecord {
    fn from(tracked: &TrackedFrame) -> Self {
        Self {
            index: tracked.index(),
            detections: tracked.detections.clone(),
        }
    }
}

fn visible(labels: &[ActionLabel], threshold: f32) -> Vec<ActionLabel> {
    labels
        .iter()
        .filter(|l| l.score >= threshold)
        .cloned()
        .collect()
}

/// Annotates frames as they arrive, keeping the latest labels per track.
///
/// A label lives only while its track stays on screen and the newest
/// prediction still covers it.
#[derive(Debug)]
pub struct RealtimeAnnotator {
    labels: HashMap<TrackId, Vec<ActionLabel>>,
    threshold: f32,
}

impl RealtimeAnnotator {
    pub fn new(threshold: f32) -> Self {
        Self {
            labels: HashMap::new(),
            threshold,
        }
    }

    pub fn annotate(
        &mut self,
        tracked: &TrackedFrame,
        prediction: Option<ActionPrediction>,
    ) -> AnnotatedFrame {
        if let Some(prediction) = prediction {
            self.labels = prediction
                .labels
                .into_iter()
                .map(|(id, labels)| (id, visible(&labels, self.threshold)))
                .collect();
        }
        let present: HashSet<TrackId> = tracked.detections.iter().map(|d| d.track_id).collect();
        self.labels.retain(|id, _| present.contains(id));

        let annotations = tracked
            .detections
            .iter()
            .map(|d| Annotation {
                bbox: d.bbox,
                score: d.score,
                identity: d.track_id,
                labels: self.labels.get(&d.track_id).cloned().unwrap_or_default(),
            })
            .collect();

        AnnotatedFrame {
            index: tracked.index(),
            frame: Some(tracked.raw_frame.clone()),
            annotations,
        }
    }
}

/// Buffers a whole stream and renders it once identities are fused.
///
/// Prediction `k` takes effect at record position `k * interval`, matching
/// the worker's classification cadence.
#[derive(Debug)]
pub struct BatchRenderer {
    records: Vec<TrackRecord>,
    predictions: Vec<ActionPrediction>,
    remap: Option<IdentityRemap>,
    tracks_done: bool,
    stream_done: bool,
    interval: usize,
    threshold: f32,
}

impl BatchRenderer {
    pub fn new(interval: usize, threshold: f32) -> Self {
        Self {
            records: Vec::new(),
            predictions: Vec::new(),
            remap: None,
            tracks_done: false,
            stream_done: false,
            interval: interval.max(1),
            threshold,
        }
    }

    pub fn push_track(&mut self, record: TrackRecord) {
        if self.tracks_done {
            warn!(frame = record.index, "track record after end of tracks, ignored");
            return;
        }
        self.records.push(record);
    }

    pub fn push_prediction(&mut self, prediction: ActionPrediction) {
        self.predictions.push(prediction);
    }

    pub fn set_remap(&mut self, remap: IdentityRemap) {
        self.remap = Some(remap);
    }

    pub fn end_tracks(&mut self) {
        self.tracks_done = true;
    }

    pub fn end_stream(&mut self) {
        self.stream_done = true;
    }

    pub fn pending_frames(&self) -> usize {
        self.records.len()
    }

    /// Render every buffered frame into `sink`. Returns the number written.
    ///
    /// Buffers are consumed; a second call renders nothing.
    pub fn render<S: RenderSink>(&mut self, sink: &mut S) -> Result<usize, VisualizerError> {
        if !self.stream_done {
            return Err(VisualizerError::NotFinished);
        }
        let remap = self.remap.take().unwrap_or_else(|| {
            warn!("rendering without identity remap, keeping tracker ids");
            IdentityRemap::default()
        });
        let records = std::mem::take(&mut self.records);
        let predictions = std::mem::take(&mut self.predictions);

        // Pass 1: move every id into long-term space.
        let timeline: Vec<(usize, BTreeMap<TrackId, Vec<ActionLabel>>)> = predictions
            .into_iter()
            .enumerate()
            .map(|(k, p)| {
                let labels = p
                    .labels
                    .into_iter()
                    .map(|(id, labels)| (remap.resolve(id), visible(&labels, self.threshold)))
                    .collect();
                (k * self.interval, labels)
            })
            .collect();
        debug!(
            frames = records.len(),
            predictions = timeline.len(),
            "resolved identities for render"
        );

        // Pass 2: walk frames in order, carrying the latest labels forward.
        let mut current: HashMap<TrackId, Vec<ActionLabel>> = HashMap::new();
        let mut pending = timeline.into_iter().peekable();
        let mut written = 0;

        for (pos, record) in records.into_iter().enumerate() {
            while let Some((_, labels)) = pending.next_if(|(start, _)| *start <= pos) {
                current.extend(labels);
            }

            let annotations = record
                .detections
                .iter()
                .map(|d| {
                    let identity = remap.resolve(d.track_id);
                    Annotation {
                        bbox: d.bbox,
                        score: d.score,
                        identity,
                        labels: current.get(&identity).cloned().unwrap_or_default(),
                    }
                })
                .collect();

            sink.write(AnnotatedFrame {
                index: record.index,
                frame: None,
                annotations,
            })
            .map_err(|e| VisualizerError::Sink(e.to_string()))?;
            written += 1;
        }

        info!(frames = written, "batch render finished");
        Ok(written)
    }
}
