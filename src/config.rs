use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::normalize::SampleFormat;
use crate::cli::Cli;
use crate::error::ConfigError;

pub const DEFAULT_URL: &str = "http://simula.frikanalen.no:9094/frikanalen.ts";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Pause between reconnect attempts. Zero retries immediately.
    #[serde(default)]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    #[serde(default = "default_audio_format")]
    pub audio_format: SampleFormat,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

#[derive(Debug, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_ring_frames")]
    pub ring_frames: usize,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    /// Recompute and publish metrics on every Kth frame of each kind.
    #[serde(default = "default_sample_interval")]
    pub sample_interval: u64,
    #[serde(default)]
    pub on_unsupported_format: FormatPolicy,
}

/// What to do with a frame the analysis buffers cannot take.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatPolicy {
    #[default]
    Skip,
    Abort,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: 0,
            stall_timeout_ms: default_stall_timeout_ms(),
            audio_format: default_audio_format(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            namespace: default_namespace(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ring_frames: default_ring_frames(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            on_unsupported_format: FormatPolicy::default(),
        }
    }
}

fn default_url() -> String { DEFAULT_URL.into() }
fn default_stall_timeout_ms() -> u64 { 10_000 }
fn default_audio_format() -> SampleFormat { SampleFormat::S16 }
fn default_ffmpeg() -> String { "ffmpeg".into() }
fn default_ffprobe() -> String { "ffprobe".into() }
fn default_port() -> u16 { 8000 }
fn default_namespace() -> String { "tsprobe".into() }
fn default_window_seconds() -> f64 { 1.0 }
fn default_sample_rate() -> u32 { 48000 }
fn default_ring_frames() -> usize { 25 }
fn default_sample_interval() -> u64 { 1 }

impl Config {
    /// Flags and environment variables win over file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(ref url) = cli.url {
            self.source.url = url.clone();
        }
        if let Some(port) = cli.metrics_port {
            self.metrics.port = port;
        }
        if let Some(window) = cli.audio_window {
            self.audio.window_seconds = window;
        }
        if let Some(frames) = cli.video_frames {
            self.video.ring_frames = frames;
        }
        if let Some(interval) = cli.sample_interval {
            self.analysis.sample_interval = interval;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.url.trim().is_empty() {
            return Err(ConfigError::Invalid("stream URL is empty".into()));
        }
        if self.metrics.port == 0 {
            return Err(ConfigError::Invalid("metrics port must be non-zero".into()));
        }
        if !(self.audio.window_seconds.is_finite() && self.audio.window_seconds > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "audio window must be a positive number of seconds, got {}",
                self.audio.window_seconds
            )));
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio sample rate must be non-zero".into()));
        }
        if self.audio_capacity() == 0 {
            return Err(ConfigError::Invalid(
                "audio window holds no samples at this sample rate".into(),
            ));
        }
        if self.video.ring_frames < 2 {
            return Err(ConfigError::Invalid(format!(
                "video ring needs at least 2 frames to measure motion, got {}",
                self.video.ring_frames
            )));
        }
        if self.analysis.sample_interval == 0 {
            return Err(ConfigError::Invalid("sample interval must be at least 1".into()));
        }
        Ok(())
    }

    /// Samples per channel held by the audio window.
    pub fn audio_capacity(&self) -> usize {
        (self.audio.window_seconds * self.audio.sample_rate as f64).round() as usize
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.source.reconnect_delay_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.source.stall_timeout_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// `tsprobe.toml` in the working directory, then the per-user config locations.
pub fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("tsprobe.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("tsprobe").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("tsprobe").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_probe() {
        let config = Config::default();
        assert_eq!(config.source.url, DEFAULT_URL);
        assert_eq!(config.metrics.port, 8000);
        assert_eq!(config.audio_capacity(), 48000);
        assert_eq!(config.video.ring_frames, 25);
        assert_eq!(config.analysis.sample_interval, 1);
        assert_eq!(config.analysis.on_unsupported_format, FormatPolicy::Skip);
        assert_eq!(config.reconnect_delay(), Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [source]
            url = "udp://239.1.1.1:5000"
            audio_format = "flt"

            [analysis]
            on_unsupported_format = "abort"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.url, "udp://239.1.1.1:5000");
        assert_eq!(config.source.audio_format, SampleFormat::Flt);
        assert_eq!(config.source.stall_timeout_ms, 10_000);
        assert_eq!(config.analysis.on_unsupported_format, FormatPolicy::Abort);
        assert_eq!(config.metrics.namespace, "tsprobe");
    }

    #[test]
    fn cli_overrides_file() {
        let mut config: Config = toml::from_str("[metrics]\nport = 9100\n").unwrap();
        let cli = Cli::parse_from([
            "tsprobe",
            "--url",
            "http://example.com/live.ts",
            "--video-frames",
            "10",
            "--sample-interval",
            "5",
        ]);
        config.apply_cli(&cli);
        assert_eq!(config.source.url, "http://example.com/live.ts");
        assert_eq!(config.video.ring_frames, 10);
        assert_eq!(config.analysis.sample_interval, 5);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn rejects_unusable_values() {
        let mut config = Config::default();
        config.video.ring_frames = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analysis.sample_interval = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.window_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.url = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_sample_format_fails_to_parse() {
        let result: Result<Config, _> = toml::from_str("[source]\naudio_format = \"u8\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn loads_file_and_reports_parse_errors() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        writeln!(good, "[video]\nring_frames = 50").unwrap();
        assert_eq!(load_config(good.path()).unwrap().video.ring_frames, 50);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[video\nring_frames = ").unwrap();
        assert!(matches!(
            load_config(bad.path()),
            Err(ConfigError::Parse { .. })
        ));

        assert!(matches!(
            load_config(Path::new("/nonexistent/tsprobe.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
