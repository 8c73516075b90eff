//! Assembling detections from the box layouts trackers and detectors emit.

use serde::{Deserialize, Serialize};

use crate::track::detection::{Detection, TrackId};
use crate::track::rect::Rect;

/// Coordinate layout of a raw `[f32; 4]` box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxFormat {
    /// Corners: x1, y1, x2, y2.
    #[default]
    Tlbr,
    /// Top-left corner and size: x, y, w, h.
    Tlwh,
    /// Center and size: cx, cy, w, h.
    Xywh,
}

impl BoxFormat {
    pub fn to_rect(self, b: [f32; 4]) -> Rect {
        let [a, c, w, h] = b;
        match self {
            BoxFormat::Tlbr => Rect::from_tlbr(a, c, w, h),
            BoxFormat::Tlwh => Rect::new(a, c, w, h),
            BoxFormat::Xywh => Rect::new(a - w / 2.0, c - h / 2.0, w, h),
        }
    }
}

/// Incrementally assembles a [`Detection`].
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    bbox: Rect,
    score: f32,
    track_id: TrackId,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the box from a raw array in the given layout.
    pub fn bbox(mut self, format: BoxFormat, b: [f32; 4]) -> Self {
        self.bbox = format.to_rect(b);
        self
    }

    pub fn tlbr(self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox(BoxFormat::Tlbr, [x1, y1, x2, y2])
    }

    pub fn tlwh(self, l: f32, t: f32, w: f32, h: f32) -> Self {
        self.bbox(BoxFormat::Tlwh, [l, t, w, h])
    }

    pub fn xywh(self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox(BoxFormat::Xywh, [cx, cy, w, h])
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Short-term id the tracker assigned.
    pub fn track_id(mut self, track_id: TrackId) -> Self {
        self.track_id = track_id;
        self
    }

    pub fn build(self) -> Detection {
        Detection::from_rect(self.bbox, self.score, self.track_id)
    }
}
