use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::AudioAnalysisBuffer;
use crate::config::FormatPolicy;
use crate::error::{AnalysisError, ProbeError};
use crate::frame::{AudioFrame, Frame, VideoFrame};
use crate::metrics::{Counter, Gauge, MetricsSink};
use crate::source::FrameSource;
use crate::trace::Benchmarker;
use crate::video::VideoAnalysisBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub url: String,
    /// Analyse and publish on every Kth frame of each kind. Frames are always buffered.
    pub sample_interval: u64,
    pub format_policy: FormatPolicy,
    pub reconnect_delay: Duration,
}

pub struct IngestLoop<S, M> {
    source: S,
    sink: M,
    audio: AudioAnalysisBuffer,
    video: VideoAnalysisBuffer,
    settings: ProbeSettings,
    shutdown: Arc<AtomicBool>,
    bench: Benchmarker,
    state: ConnectionState,
    video_frames: u64,
    audio_frames: u64,
}

impl<S: FrameSource, M: MetricsSink> IngestLoop<S, M> {
    pub fn new(
        source: S,
        sink: M,
        audio: AudioAnalysisBuffer,
        video: VideoAnalysisBuffer,
        settings: ProbeSettings,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            sink,
            audio,
            video,
            settings: ProbeSettings {
                sample_interval: settings.sample_interval.max(1),
                ..settings
            },
            shutdown,
            bench: Benchmarker::disabled(),
            state: ConnectionState::Disconnected,
            video_frames: 0,
            audio_frames: 0,
        }
    }

    pub fn with_benchmarker(mut self, bench: Benchmarker) -> Self {
        self.bench = bench;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub fn sink(&self) -> &M {
        &self.sink
    }

    pub fn audio(&self) -> &AudioAnalysisBuffer {
        &self.audio
    }

    pub fn video(&self) -> &VideoAnalysisBuffer {
        &self.video
    }

    pub fn benchmarker(&self) -> &Benchmarker {
        &self.bench
    }

    /// Run until shutdown or a fatal error. The loop is `Terminated` either way.
    pub fn start(&mut self) -> Result<(), ProbeError> {
        log::info!("Starting probe for {}", self.settings.url);
        loop {
            if self.step()? == ConnectionState::Terminated {
                return Ok(());
            }
        }
    }

    /// Perform one transition and return the state it leaves the loop in.
    pub fn step(&mut self) -> Result<ConnectionState, ProbeError> {
        if self.state != ConnectionState::Terminated && self.shutdown.load(Ordering::SeqCst) {
            log::info!("Shutdown requested");
            self.source.close();
            self.transition(ConnectionState::Terminated);
            return Ok(self.state);
        }

        match self.state {
            ConnectionState::Disconnected => self.transition(ConnectionState::Connecting),
            ConnectionState::Connecting => match self.source.open(&self.settings.url) {
                Ok(()) => self.transition(ConnectionState::Streaming),
                Err(e) if e.is_transient() => {
                    log::warn!("Failed to open {}: {}", self.settings.url, e);
                    self.wait_before_retry();
                }
                Err(e) => return self.fail(e.into()),
            },
            ConnectionState::Streaming => match self.source.next_frame() {
                Ok(frame) => {
                    if let Err(e) = self.route(frame) {
                        return self.fail(e);
                    }
                }
                Err(e) if e.is_transient() => {
                    log::warn!("Decode error, reconnecting: {}", e);
                    self.sink.increment_counter(Counter::DecodeErrors);
                    self.source.close();
                    self.transition(ConnectionState::Connecting);
                }
                Err(e) => return self.fail(e.into()),
            },
            ConnectionState::Terminated => {}
        }
        Ok(self.state)
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            log::info!("Connection {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn fail(&mut self, err: ProbeError) -> Result<ConnectionState, ProbeError> {
        log::error!("Fatal: {}", err);
        self.source.close();
        self.transition(ConnectionState::Terminated);
        Err(err)
    }

    fn wait_before_retry(&self) {
        let deadline = Instant::now() + self.settings.reconnect_delay;
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }

    fn due(&self, count: u64) -> bool {
        (count - 1) % self.settings.sample_interval == 0
    }

    fn route(&mut self, frame: Frame) -> Result<(), ProbeError> {
        match frame {
            Frame::Video(frame) => self.on_video(&frame),
            Frame::Audio(frame) => self.on_audio(&frame),
        }
    }

    fn on_video(&mut self, frame: &VideoFrame) -> Result<(), ProbeError> {
        self.sink.increment_counter(Counter::Frames);
        self.video_frames += 1;

        if let Err(e) = self.video.append(frame) {
            return self.reject(e);
        }
        if !self.due(self.video_frames) {
            return Ok(());
        }

        let video = &self.video;
        let (brightness, motion) = self
            .bench
            .time("video_analysis", || (video.avg_brightness(), video.motion()));
        self.publish(Gauge::VideoBrightness, brightness);
        self.publish(Gauge::VideoMotion, motion);
        Ok(())
    }

    fn on_audio(&mut self, frame: &AudioFrame) -> Result<(), ProbeError> {
        self.audio_frames += 1;

        if let Err(e) = self.audio.append(frame) {
            return self.reject(e);
        }
        if !self.due(self.audio_frames) {
            return Ok(());
        }

        let audio = &mut self.audio;
        let (lufs, dbfs) = self.bench.time("audio_analysis", || {
            let lufs = audio.integrated_loudness();
            audio.instantaneous_level(0).map(|dbfs| (lufs, dbfs))
        })?;
        self.publish(Gauge::AudioLoudnessLufs, lufs);
        self.publish(Gauge::AudioLevelDbfs, dbfs);
        Ok(())
    }

    fn publish(&mut self, gauge: Gauge, value: f64) {
        self.sink.set_gauge(gauge, value);
        self.bench.add_metric_sample(gauge.name(), "value", value);
    }

    /// Apply the configured policy to a frame the buffers refused.
    fn reject(&self, err: AnalysisError) -> Result<(), ProbeError> {
        match self.settings.format_policy {
            FormatPolicy::Skip => {
                log::warn!("Skipping frame: {}", err);
                Ok(())
            }
            FormatPolicy::Abort => Err(err.into()),
        }
    }
}
