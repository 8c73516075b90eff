//! Tracker output: detections tagged with short-term track ids.

use std::sync::Arc;

use ndarray::{Array3, s};

use crate::track::builder::{BoxFormat, DetectionBuilder};
use crate::track::rect::Rect;

/// Identity assigned by the frame-to-frame tracker. Unique only within a run,
/// and reused once the tracker drops the track.
pub type TrackId = u64;

/// An image crop of a single detection, HxWxC.
pub type Patch = Array3<u8>;

/// One tracked detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box in TLWH layout
    pub bbox: Rect,
    /// Detection confidence score
    pub score: f32,
    /// Short-term tracker id
    pub track_id: TrackId,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, track_id: TrackId) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            score,
            track_id,
        }
    }

    pub fn from_rect(bbox: Rect, score: f32, track_id: TrackId) -> Self {
        Self {
            bbox,
            score,
            track_id,
        }
    }
}

/// An immutable video frame with its sequence index.
///
/// Pixel data is shared, so clones are cheap and can be handed to worker
/// threads without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    index: u64,
    pixels: Arc<Array3<u8>>,
}

impl Frame {
    pub fn new(index: u64, pixels: Array3<u8>) -> Self {
        Self {
            index,
            pixels: Arc::new(pixels),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    /// Copy out the region under `bbox`, clamped to the frame.
    ///
    /// Returns `None` for invalid boxes and boxes entirely outside the frame.
    pub fn crop(&self, bbox: &Rect) -> Option<Patch> {
        let (r0, r1, c0, c1) = bbox.clamp_to(self.width(), self.height())?;
        Some(self.pixels.slice(s![r0..r1, c0..c1, ..]).to_owned())
    }
}

/// One element of the tracker's output stream.
#[derive(Debug, Clone)]
pub struct TrackedFrame {
    /// Frame the tracker ran on; crops are taken from here.
    pub frame: Frame,
    /// Original frame used for rendering.
    pub raw_frame: Frame,
    pub detections: Vec<Detection>,
}

impl TrackedFrame {
    pub fn new(frame: Frame, raw_frame: Frame, detections: Vec<Detection>) -> Self {
        Self {
            frame,
            raw_frame,
            detections,
        }
    }

    /// Build from the flat `(boxes, scores, ids)` layout trackers emit.
    ///
    /// Returns `None` when the three sequences differ in length.
    pub fn from_parts(
        frame: Frame,
        raw_frame: Frame,
        format: BoxFormat,
        boxes: &[[f32; 4]],
        scores: &[f32],
        ids: &[TrackId],
    ) -> Option<Self> {
        if boxes.len() != scores.len() || boxes.len() != ids.len() {
            return None;
        }
        let detections = boxes
            .iter()
            .zip(scores)
            .zip(ids)
            .map(|((&b, &score), &id)| {
                DetectionBuilder::new()
                    .bbox(format, b)
                    .score(score)
                    .track_id(id)
                    .build()
            })
            .collect();
        Some(Self::new(frame, raw_frame, detections))
    }

    pub fn index(&self) -> u64 {
        self.frame.index()
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.detections.iter().map(|d| d.track_id).collect()
    }
}
