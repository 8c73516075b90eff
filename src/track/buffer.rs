//! Per-track patch accumulation and per-frame id sets.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use crate::error::BufferError;
use crate::track::detection::{Detection, Frame, Patch, TrackId};
use crate::track::rect::Rect;

/// A detection that could not be cropped and was left out of its track's patches.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedDetection {
    pub frame_index: u64,
    pub track_id: TrackId,
    pub bbox: Rect,
}

/// Outcome of recording one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordReport {
    /// Number of patches appended.
    pub recorded: usize,
    pub malformed: Vec<MalformedDetection>,
}

#[derive(Debug, Default)]
struct TrackPatches {
    patches: VecDeque<Patch>,
    observations: usize,
}

/// Accumulates image crops per short-term id and the ids active in each frame.
///
/// Both collections are append-only for the lifetime of a run. The per-frame
/// id sets are kept in arrival order, which the fuser relies on.
#[derive(Debug, Default)]
pub struct TrackBuffer {
    tracks: BTreeMap<TrackId, TrackPatches>,
    frame_ids: Vec<BTreeSet<TrackId>>,
    last_frame: Option<u64>,
    max_patches: Option<usize>,
}

impl TrackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `cap` patches per id; older patches are dropped first.
    pub fn with_patch_cap(cap: Option<usize>) -> Self {
        Self {
            max_patches: cap.filter(|&c| c > 0),
            ..Self::default()
        }
    }

    /// Record one frame of tracker output.
    ///
    /// Every detection's id joins this frame's id set. Detections whose box
    /// yields no pixels are skipped and reported, the rest of the frame is
    /// still recorded.
    pub fn record(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
    ) -> Result<RecordReport, BufferError> {
        let index = frame.index();
        if let Some(last) = self.last_frame {
            if index <= last {
                return Err(BufferError::OutOfOrderFrame { last, got: index });
            }
        }
        self.last_frame = Some(index);

        let mut report = RecordReport::default();
        let mut ids = BTreeSet::new();

        for det in detections {
            ids.insert(det.track_id);

            let Some(patch) = frame.crop(&det.bbox) else {
                warn!(
                    frame = index,
                    track_id = det.track_id,
                    bbox = ?det.bbox,
                    "malformed detection, skipping patch"
                );
                report.malformed.push(MalformedDetection {
                    frame_index: index,
                    track_id: det.track_id,
                    bbox: det.bbox,
                });
                continue;
            };

            let entry = self.tracks.entry(det.track_id).or_default();
            entry.patches.push_back(patch);
            entry.observations += 1;
            if let Some(cap) = self.max_patches {
                while entry.patches.len() > cap {
                    entry.patches.pop_front();
                }
            }
            report.recorded += 1;
        }

        debug!(frame = index, ids = ids.len(), patches = report.recorded, "recorded frame");
        self.frame_ids.push(ids);
        Ok(report)
    }

    /// Patches currently held for `id`, oldest first.
    pub fn patches(&self, id: TrackId) -> Vec<&Patch> {
        self.tracks
            .get(&id)
            .map(|t| t.patches.iter().collect())
            .unwrap_or_default()
    }

    /// Number of successful crops ever recorded for `id`, including any
    /// dropped by the patch cap.
    pub fn observations(&self, id: TrackId) -> usize {
        self.tracks.get(&id).map_or(0, |t| t.observations)
    }

    /// Ids active in each recorded frame, in arrival order.
    pub fn frame_ids(&self) -> &[BTreeSet<TrackId>] {
        &self.frame_ids
    }

    /// Every id seen in any frame, ascending.
    pub fn track_ids(&self) -> BTreeSet<TrackId> {
        self.frame_ids.iter().flatten().copied().collect()
    }

    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.frame_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_ids.is_empty()
    }
}
