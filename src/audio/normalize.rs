use serde::Deserialize;

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S16,
    S32,
    Flt,
    Dbl,
}

impl SampleFormat {
    /// Parse a decoder format tag. Planar and packed spellings map to the same format
    /// since samples arrive one plane per channel either way.
    pub fn from_tag(tag: &str) -> Result<Self, AnalysisError> {
        match tag {
            "s16" | "s16p" => Ok(SampleFormat::S16),
            "s32" | "s32p" => Ok(SampleFormat::S32),
            "flt" | "fltp" => Ok(SampleFormat::Flt),
            "dbl" | "dblp" => Ok(SampleFormat::Dbl),
            other => Err(AnalysisError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::Flt => "flt",
            SampleFormat::Dbl => "dbl",
        }
    }

    /// Bytes per sample.
    pub fn width(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::Flt => 4,
            SampleFormat::Dbl => 8,
        }
    }

    /// Name of the matching little-endian raw muxer in ffmpeg.
    pub fn ffmpeg_muxer(self) -> &'static str {
        match self {
            SampleFormat::S16 => "s16le",
            SampleFormat::S32 => "s32le",
            SampleFormat::Flt => "f32le",
            SampleFormat::Dbl => "f64le",
        }
    }
}

/// Number of samples a plane holds in the given format.
pub fn sample_count(format: SampleFormat, plane: &[u8]) -> Result<usize, AnalysisError> {
    let width = format.width();
    if plane.len() % width != 0 {
        return Err(AnalysisError::MalformedPlane {
            len: plane.len(),
            width,
        });
    }
    Ok(plane.len() / width)
}

/// Normalize one channel's raw bytes.
///
/// Integer formats are divided by the type's positive maximum, so `i16::MIN`
/// maps slightly below -1.0. Float formats pass through, `f64` narrowed to `f32`.
pub fn normalize(tag: &str, plane: &[u8]) -> Result<Vec<f32>, AnalysisError> {
    let format = SampleFormat::from_tag(tag)?;
    sample_count(format, plane)?;

    let samples = match format {
        SampleFormat::S16 => {
            let raw: Vec<i16> = bytemuck::allocation::pod_collect_to_vec(plane);
            let scale = i16::MAX as f32;
            raw.into_iter().map(|s| s as f32 / scale).collect()
        }
        SampleFormat::S32 => {
            let raw: Vec<i32> = bytemuck::allocation::pod_collect_to_vec(plane);
            let scale = i32::MAX as f64;
            raw.into_iter().map(|s| (s as f64 / scale) as f32).collect()
        }
        SampleFormat::Flt => bytemuck::allocation::pod_collect_to_vec(plane),
        SampleFormat::Dbl => {
            let raw: Vec<f64> = bytemuck::allocation::pod_collect_to_vec(plane);
            raw.into_iter().map(|s| s as f32).collect()
        }
    };
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bytes_of<T: bytemuck::Pod>(samples: &[T]) -> Vec<u8> {
        bytemuck::cast_slice(samples).to_vec()
    }

    #[test]
    fn int16_scales_by_max() {
        let plane = bytes_of(&[0i16, i16::MAX, -i16::MAX, 16384]);
        let out = normalize("s16", &plane).unwrap();
        assert_eq!(out.len(), 4);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], 1.0);
        assert_relative_eq!(out[2], -1.0);
        assert_relative_eq!(out[3], 16384.0 / 32767.0, epsilon = 1e-6);
    }

    #[test]
    fn int32_scales_by_max() {
        let plane = bytes_of(&[i32::MAX, i32::MAX / 2, 0]);
        let out = normalize("s32p", &plane).unwrap();
        assert_relative_eq!(out[0], 1.0);
        assert_relative_eq!(out[1], 0.5, epsilon = 1e-6);
        assert_relative_eq!(out[2], 0.0);
    }

    #[test]
    fn floats_pass_through() {
        let plane = bytes_of(&[0.25f32, -0.5, 1.0]);
        assert_eq!(normalize("fltp", &plane).unwrap(), vec![0.25, -0.5, 1.0]);

        let plane = bytes_of(&[0.125f64, -0.75]);
        assert_eq!(normalize("dbl", &plane).unwrap(), vec![0.125f32, -0.75]);
    }

    #[test]
    fn rejects_unknown_tags() {
        let err = normalize("u8", &[0, 1, 2]).unwrap_err();
        assert_eq!(err, AnalysisError::UnsupportedFormat("u8".into()));
        assert!(SampleFormat::from_tag("s64").is_err());
    }

    #[test]
    fn rejects_partial_samples() {
        let err = normalize("s16", &[0, 1, 2]).unwrap_err();
        assert_eq!(err, AnalysisError::MalformedPlane { len: 3, width: 2 });
    }

    #[test]
    fn empty_plane_is_empty() {
        assert!(normalize("dbl", &[]).unwrap().is_empty());
    }
}
