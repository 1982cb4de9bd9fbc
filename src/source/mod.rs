pub mod ffmpeg;

use crate::error::SourceError;
use crate::frame::Frame;

/// A live stream that can be opened, drained frame by frame, and reopened.
///
/// Reconnecting is `close` followed by `open` with the same URL.
pub trait FrameSource {
    fn open(&mut self, url: &str) -> Result<(), SourceError>;

    /// Block until the next decoded frame. Errors end the current connection.
    fn next_frame(&mut self) -> Result<Frame, SourceError>;

    fn close(&mut self);
}
