use std::collections::HashSet;

use super::loudness::LoudnessMeter;
use super::normalize::normalize;
use crate::error::AnalysisError;
use crate::frame::AudioFrame;

/// Returned by `integrated_loudness` until the window has been filled once.
pub const INSUFFICIENT_DATA: f64 = 0.0;

/// Fixed-duration rolling window of stereo PCM with loudness and level analysis.
///
/// Both channels share one write cursor. Cells not yet written hold silence, so
/// the logical window length is always `capacity`.
pub struct AudioAnalysisBuffer {
    channels: [Vec<f32>; 2],
    cursor: usize,
    written: u64,
    sample_rate: u32,
    meter: LoudnessMeter,
    warned_rates: HashSet<u32>,
}

impl AudioAnalysisBuffer {
    /// Window of `window_seconds` at the reference `sample_rate`.
    pub fn new(window_seconds: f64, sample_rate: u32) -> Result<Self, AnalysisError> {
        let capacity = (window_seconds * sample_rate as f64).round() as usize;
        Self::with_capacity(capacity, sample_rate)
    }

    pub fn with_capacity(capacity: usize, sample_rate: u32) -> Result<Self, AnalysisError> {
        let capacity = capacity.max(1);
        Ok(Self {
            channels: [vec![0.0; capacity], vec![0.0; capacity]],
            cursor: 0,
            written: 0,
            sample_rate,
            meter: LoudnessMeter::new(sample_rate)?,
            warned_rates: HashSet::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.channels[0].len()
    }

    /// Samples per channel written since construction.
    pub fn samples_written(&self) -> u64 {
        self.written
    }

    /// True until `capacity` samples per channel have been written.
    pub fn is_cold(&self) -> bool {
        self.written < self.capacity() as u64
    }

    /// Normalize a stereo frame and write it over the oldest samples.
    pub fn append(&mut self, frame: &AudioFrame) -> Result<(), AnalysisError> {
        if frame.channel_count() != 2 {
            return Err(AnalysisError::ChannelCount(frame.channel_count()));
        }

        let left = normalize(&frame.format, &frame.planes[0])?;
        let right = normalize(&frame.format, &frame.planes[1])?;
        if left.len() != right.len() {
            return Err(AnalysisError::PlaneLengthMismatch {
                left: left.len(),
                right: right.len(),
            });
        }

        if frame.sample_rate != self.sample_rate && self.warned_rates.insert(frame.sample_rate) {
            log::warn!(
                "Audio arrives at {} Hz, window is sized for {} Hz; loudness will be skewed",
                frame.sample_rate,
                self.sample_rate
            );
        }

        self.write(&left, &right);
        Ok(())
    }

    fn write(&mut self, left: &[f32], right: &[f32]) {
        let capacity = self.capacity();
        let n = left.len();
        self.written = self.written.saturating_add(n as u64);

        // Only the newest `capacity` samples can survive the write.
        let skip = n.saturating_sub(capacity);
        let count = n - skip;
        let head = count.min(capacity - self.cursor);
        let start = self.cursor;

        for (ring, src) in self.channels.iter_mut().zip([&left[skip..], &right[skip..]]) {
            ring[start..start + head].copy_from_slice(&src[..head]);
            ring[..count - head].copy_from_slice(&src[head..]);
        }

        self.cursor = (start + count) % capacity;
    }

    /// Window contents of one channel, oldest first, as two contiguous runs.
    #[cfg(test)]
    pub fn chronological(&self, channel: usize) -> Result<(&[f32], &[f32]), AnalysisError> {
        let ring = self
            .channels
            .get(channel)
            .ok_or(AnalysisError::InvalidChannel(channel))?;
        Ok((&ring[self.cursor..], &ring[..self.cursor]))
    }

    /// Gated integrated loudness in LUFS over the whole window, both channels jointly.
    /// Returns [`INSUFFICIENT_DATA`] while the window is cold.
    pub fn integrated_loudness(&mut self) -> f64 {
        if self.is_cold() {
            log::info!(
                "Buffer {} too small to calculate LUFS (need {})",
                self.written,
                self.capacity()
            );
            return INSUFFICIENT_DATA;
        }

        log::debug!("Calculating LUFS");
        let [left, right] = &self.channels;
        let cursor = self.cursor;
        self.meter.integrated(&[
            [&left[cursor..], &right[cursor..]],
            [&left[..cursor], &right[..cursor]],
        ])
    }

    /// Signal level of one channel over the whole window in dBFS.
    ///
    /// RMS is referenced to a full-scale sine (AES17), so such a sine reads 0 dBFS.
    /// Digital silence gives negative infinity.
    pub fn instantaneous_level(&self, channel: usize) -> Result<f64, AnalysisError> {
        let ring = self
            .channels
            .get(channel)
            .ok_or(AnalysisError::InvalidChannel(channel))?;
        let mean_square =
            ring.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / ring.len() as f64;
        Ok(20.0 * (mean_square.sqrt() * std::f64::consts::SQRT_2).log10())
    }
}
