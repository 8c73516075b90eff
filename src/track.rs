mod buffer;
mod builder;
mod detection;
mod rect;

pub use buffer::{MalformedDetection, RecordReport, TrackBuffer};
pub use builder::{BoxFormat, DetectionBuilder};
pub use detection::{Detection, Frame, Patch, TrackId, TrackedFrame};
pub use rect::Rect;
