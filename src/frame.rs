/// A decoded frame. Immutable once received.
#[derive(Debug, Clone)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

/// Grayscale view of a decoded picture: one byte of luma per pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, luma: Vec<u8>) -> Self {
        Self {
            width,
            height,
            luma,
        }
    }

    /// Frame filled with a single luma value.
    #[cfg(test)]
    pub fn uniform(width: u32, height: u32, value: u8) -> Self {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Decoder sample format tag, e.g. `s16`, `fltp`, `dbl`.
    pub format: String,
    pub sample_rate: u32,
    /// One native-endian byte buffer per channel.
    pub planes: Vec<Vec<u8>>,
}

impl AudioFrame {
    pub fn new(format: impl Into<String>, sample_rate: u32, planes: Vec<Vec<u8>>) -> Self {
        Self {
            format: format.into(),
            sample_rate,
            planes,
        }
    }

    /// Planar float32 frame, mostly useful for synthesising input.
    #[cfg(test)]
    pub fn from_f32_planes(sample_rate: u32, planes: &[&[f32]]) -> Self {
        let planes = planes
            .iter()
            .map(|plane| bytemuck::cast_slice::<f32, u8>(plane).to_vec())
            .collect();
        Self::new("fltp", sample_rate, planes)
    }

    pub fn channel_count(&self) -> usize {
        self.planes.len()
    }
}
