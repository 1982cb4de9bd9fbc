pub mod buffer;

pub use buffer::VideoAnalysisBuffer;
