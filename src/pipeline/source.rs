//! Trait for tracker backends feeding the pipeline.

use crate::track::TrackedFrame;

/// Trait for detection + tracking backends.
///
/// Implement this to connect any tracker to the pipeline.
///
/// # Example
///
/// ```ignore
/// use actiontrack::{TrackSource, TrackedFrame};
///
/// struct MyTracker {
///     // decoder, detector and tracker state
/// }
///
/// impl TrackSource for MyTracker {
///     type Error = std::io::Error;
///
///     fn next_frame(&mut self) -> Result<Option<TrackedFrame>, Self::Error> {
///         // Decode, detect, track
///         Ok(None)
///     }
/// }
/// ```
pub trait TrackSource {
    /// Error type for tracker failures.
    type Error: std::fmt::Display;

    /// Produce the next tracked frame.
    ///
    /// # Returns
    /// `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, Self::Error>;
}

/// Adapts any iterator of tracked frames into a [`TrackSource`].
pub struct IterSource<I> {
    frames: I,
}

impl<I> IterSource<I> {
    pub fn new<T>(frames: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl<I: Iterator<Item = TrackedFrame>> TrackSource for IterSource<I> {
    type Error = std::convert::Infallible;

    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, Self::Error> {
        Ok(self.frames.next())
    }
}
