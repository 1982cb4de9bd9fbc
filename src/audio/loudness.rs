use ebur128::{EbuR128, Mode};

use crate::error::AnalysisError;

/// Reported when every block falls below the absolute gate.
pub const LOUDNESS_FLOOR_LUFS: f64 = -70.0;

/// K-weighted, gated loudness of a stereo pair.
///
/// The meter's filter state and block history are cleared before every
/// measurement, so a result only depends on the samples passed in.
pub struct LoudnessMeter {
    meter: EbuR128,
}

impl LoudnessMeter {
    pub fn new(sample_rate: u32) -> Result<Self, AnalysisError> {
        let meter = EbuR128::new(2, sample_rate, Mode::I)
            .map_err(|e| AnalysisError::Meter(format!("{:?}", e)))?;
        Ok(Self { meter })
    }

    /// Measure a window handed over as consecutive `[left, right]` segments,
    /// oldest segment first. Both channels of a segment must be equally long.
    pub fn integrated(&mut self, segments: &[[&[f32]; 2]]) -> f64 {
        self.meter.reset();

        for [left, right] in segments {
            if left.is_empty() {
                continue;
            }
            if let Err(e) = self.meter.add_frames_planar_f32(&[*left, *right]) {
                log::error!("Loudness meter rejected {} frames: {:?}", left.len(), e);
                return LOUDNESS_FLOOR_LUFS;
            }
        }

        match self.meter.loudness_global() {
            Ok(lufs) if lufs.is_finite() => lufs.max(LOUDNESS_FLOOR_LUFS),
            Ok(_) => LOUDNESS_FLOOR_LUFS,
            Err(e) => {
                log::error!("Loudness measurement failed: {:?}", e);
                LOUDNESS_FLOOR_LUFS
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn silence_sits_on_the_floor() {
        let mut meter = LoudnessMeter::new(48000).unwrap();
        let zeros = vec![0.0f32; 48000];
        assert_eq!(meter.integrated(&[[&zeros[..], &zeros[..]]]), LOUDNESS_FLOOR_LUFS);
    }

    #[test]
    fn full_scale_tone_is_near_zero_lufs() {
        let mut meter = LoudnessMeter::new(48000).unwrap();
        let tone = sine(1000.0, 1.0, 48000, 48000);
        let lufs = meter.integrated(&[[&tone[..], &tone[..]]]);
        assert!(lufs > -2.0 && lufs < 2.0, "Expected ~0 LUFS, got {}", lufs);
    }

    #[test]
    fn quieter_tone_measures_lower() {
        let mut meter = LoudnessMeter::new(48000).unwrap();
        let loud = sine(1000.0, 1.0, 48000, 48000);
        let quiet = sine(1000.0, 0.1, 48000, 48000);
        let loud_lufs = meter.integrated(&[[&loud[..], &loud[..]]]);
        let quiet_lufs = meter.integrated(&[[&quiet[..], &quiet[..]]]);
        // -20 dB in amplitude
        assert!((loud_lufs - quiet_lufs - 20.0).abs() < 0.5);
    }

    #[test]
    fn split_segments_match_contiguous_window() {
        let mut meter = LoudnessMeter::new(48000).unwrap();
        let tone = sine(440.0, 0.5, 48000, 48000);
        let whole = meter.integrated(&[[&tone[..], &tone[..]]]);
        let (a, b) = tone.split_at(17_000);
        let split = meter.integrated(&[[a, a], [b, b]]);
        assert!((whole - split).abs() < 1e-6);
    }

    #[test]
    fn result_does_not_depend_on_call_history() {
        let mut meter = LoudnessMeter::new(48000).unwrap();
        let tone = sine(1000.0, 0.5, 48000, 48000);
        let zeros = vec![0.0f32; 48000];
        let first = meter.integrated(&[[&tone[..], &tone[..]]]);
        meter.integrated(&[[&zeros[..], &zeros[..]]]);
        assert_eq!(meter.integrated(&[[&tone[..], &tone[..]]]), first);
    }
}
