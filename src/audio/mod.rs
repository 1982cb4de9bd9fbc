pub mod buffer;
pub mod loudness;
pub mod normalize;

pub use buffer::AudioAnalysisBuffer;
