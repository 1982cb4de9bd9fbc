use rayon::prelude::*;

use crate::error::AnalysisError;
use crate::frame::VideoFrame;

/// Rolling window of the last `N` luma frames, all at one resolution.
///
/// Frames are kept as 8-bit luma and normalized to [0, 1] when analysed.
pub struct VideoAnalysisBuffer {
    slots: Vec<Vec<u8>>,
    /// Next slot to overwrite once the ring is full.
    cursor: usize,
    capacity: usize,
    geometry: Option<(u32, u32)>,
}

impl VideoAnalysisBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
            geometry: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current `(width, height)`, if any frame has been stored.
    #[cfg(test)]
    pub fn geometry(&self) -> Option<(u32, u32)> {
        self.geometry
    }

    /// Store a frame over the oldest one. A frame at a new resolution discards
    /// the whole history first.
    pub fn append(&mut self, frame: &VideoFrame) -> Result<(), AnalysisError> {
        if frame.luma.len() != frame.pixel_count() {
            return Err(AnalysisError::LumaSize {
                width: frame.width,
                height: frame.height,
                expected: frame.pixel_count(),
                actual: frame.luma.len(),
            });
        }

        let geometry = (frame.width, frame.height);
        if self.geometry != Some(geometry) {
            if let Some((w, h)) = self.geometry {
                log::info!(
                    "Video resolution changed {}x{} -> {}x{}, discarding {} buffered frame(s)",
                    w,
                    h,
                    frame.width,
                    frame.height,
                    self.slots.len()
                );
            }
            self.slots = Vec::with_capacity(self.capacity);
            self.cursor = 0;
            self.geometry = Some(geometry);
        }

        if self.slots.len() < self.capacity {
            self.slots.push(frame.luma.clone());
        } else {
            self.slots[self.cursor].copy_from_slice(&frame.luma);
            self.cursor = (self.cursor + 1) % self.capacity;
        }
        Ok(())
    }

    /// Stored frames, oldest first.
    pub fn chronological(&self) -> Vec<&[u8]> {
        let (newer, older) = self.slots.split_at(self.cursor);
        older
            .iter()
            .chain(newer)
            .map(|slot| slot.as_slice())
            .collect()
    }

    /// Mean pixel intensity over every held frame, in [0, 1].
    pub fn avg_brightness(&self) -> f64 {
        if self.is_empty() {
            log::warn!("Buffer empty, returning 0");
            return 0.0;
        }

        let (sum, pixels) = self
            .slots
            .par_iter()
            .map(|slot| {
                let sum: u64 = slot.iter().map(|&p| p as u64).sum();
                (sum, slot.len() as u64)
            })
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

        if pixels == 0 {
            return 0.0;
        }
        sum as f64 / pixels as f64 / 255.0
    }

    /// Mean absolute difference between consecutive frames in time order,
    /// averaged over all pairs, in [0, 1].
    pub fn motion(&self) -> f64 {
        if self.slots.len() < 2 {
            log::warn!("Buffer too small to calculate motion");
            return 0.0;
        }

        let frames = self.chronological();
        let pairs = frames.len() - 1;
        let total: f64 = frames
            .par_windows(2)
            .map(|pair| mean_abs_diff(pair[0], pair[1]))
            .sum();

        total / pairs as f64 / 255.0
    }
}

fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let sum: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();
    sum as f64 / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 1x1 frames carry their tag as the single luma value.
    fn tagged(tag: u8) -> VideoFrame {
        VideoFrame::uniform(1, 1, tag)
    }

    #[test]
    fn ring_holds_last_frames_in_time_order() {
        let mut buf = VideoAnalysisBuffer::new(5);
        for tag in 0..13u8 {
            buf.append(&tagged(tag)).unwrap();
        }
        let order: Vec<u8> = buf.chronological().iter().map(|f| f[0]).collect();
        assert_eq!(order, vec![8, 9, 10, 11, 12]);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn partially_filled_ring_is_in_order() {
        let mut buf = VideoAnalysisBuffer::new(5);
        for tag in [7u8, 3, 9] {
            buf.append(&tagged(tag)).unwrap();
        }
        let order: Vec<u8> = buf.chronological().iter().map(|f| f[0]).collect();
        assert_eq!(order, vec![7, 3, 9]);
    }

    #[test]
    fn brightness_of_empty_ring_is_zero() {
        let buf = VideoAnalysisBuffer::new(4);
        assert_eq!(buf.avg_brightness(), 0.0);
        assert_eq!(buf.motion(), 0.0);
    }

    #[test]
    fn brightness_averages_all_frames() {
        let mut buf = VideoAnalysisBuffer::new(4);
        buf.append(&VideoFrame::uniform(4, 2, 0)).unwrap();
        buf.append(&VideoFrame::uniform(4, 2, 255)).unwrap();
        assert_relative_eq!(buf.avg_brightness(), 0.5);
    }

    #[test]
    fn identical_frames_have_no_motion() {
        let mut buf = VideoAnalysisBuffer::new(4);
        let frame = VideoFrame::new(3, 2, vec![10, 200, 30, 40, 50, 255]);
        for _ in 0..6 {
            buf.append(&frame).unwrap();
        }
        assert_eq!(buf.motion(), 0.0);
    }

    #[test]
    fn larger_deltas_mean_more_motion() {
        let mut small = VideoAnalysisBuffer::new(2);
        small.append(&VideoFrame::uniform(8, 8, 100)).unwrap();
        small.append(&VideoFrame::uniform(8, 8, 110)).unwrap();

        let mut large = VideoAnalysisBuffer::new(2);
        large.append(&VideoFrame::uniform(8, 8, 100)).unwrap();
        large.append(&VideoFrame::uniform(8, 8, 160)).unwrap();

        assert_relative_eq!(small.motion(), 10.0 / 255.0);
        assert!(large.motion() > small.motion());
    }

    #[test]
    fn motion_follows_time_order_after_wrap() {
        // 0, 0, 255 after wrapping: only the last pair moved.
        let mut buf = VideoAnalysisBuffer::new(3);
        for tag in [255u8, 0, 0, 255] {
            buf.append(&tagged(tag)).unwrap();
        }
        assert_relative_eq!(buf.motion(), 0.5);

        // Out-of-order comparison of the raw slots [255, 0, 0] would also give 0.5,
        // so check an asymmetric sequence too: 10, 20, 80.
        let mut buf = VideoAnalysisBuffer::new(3);
        for tag in [99u8, 10, 20, 80] {
            buf.append(&tagged(tag)).unwrap();
        }
        assert_relative_eq!(buf.motion(), (10.0 + 60.0) / 2.0 / 255.0);
    }

    #[test]
    fn resolution_change_discards_history() {
        let mut buf = VideoAnalysisBuffer::new(4);
        for _ in 0..3 {
            buf.append(&VideoFrame::uniform(4, 4, 255)).unwrap();
        }
        buf.append(&VideoFrame::uniform(2, 2, 51)).unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.geometry(), Some((2, 2)));
        assert_relative_eq!(buf.avg_brightness(), 0.2);
        assert_eq!(buf.motion(), 0.0);
    }

    #[test]
    fn rejects_short_luma_plane() {
        let mut buf = VideoAnalysisBuffer::new(4);
        let err = buf.append(&VideoFrame::new(4, 4, vec![0; 15])).unwrap_err();
        assert!(matches!(err, AnalysisError::LumaSize { expected: 16, actual: 15, .. }));
        assert!(buf.is_empty());
    }
}
