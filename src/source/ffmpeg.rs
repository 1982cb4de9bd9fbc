use serde::Deserialize;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

use super::FrameSource;
use crate::audio::normalize::SampleFormat;
use crate::error::SourceError;
use crate::frame::{AudioFrame, Frame, VideoFrame};

/// Sample frames per emitted audio frame, close to a typical AAC/MP2 frame.
const AUDIO_CHUNK_FRAMES: usize = 1152;

/// Decoded frames waiting for the analysis loop. Full means ffmpeg blocks on its pipe.
const FRAME_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub sample_rate: u32,
    pub audio_format: SampleFormat,
    pub stall_timeout: Duration,
}

type FrameResult = Result<Frame, SourceError>;

/// Decodes a live stream with `ffmpeg` child processes.
///
/// One child emits raw 8-bit luma, another interleaved stereo PCM. Reader threads
/// turn their stdout into frames and hand them to `next_frame` through one queue.
///
/// Every open connects to the URL three times (ffprobe plus both decoders). A
/// source that serves a single client at a time can refuse the later connections.
pub struct FfmpegSource {
    options: FfmpegOptions,
    session: Option<Session>,
}

struct Session {
    frames: Receiver<FrameResult>,
    children: Vec<Child>,
    threads: Vec<JoinHandle<()>>,
}

#[derive(Debug, Default, PartialEq)]
struct StreamLayout {
    video: Option<(u32, u32)>,
    audio: bool,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
}

impl FfmpegSource {
    pub fn new(options: FfmpegOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    fn probe(&self, url: &str) -> Result<StreamLayout, SourceError> {
        let output = Command::new(&self.options.ffprobe)
            .args([
                "-v", "error",
                "-show_entries", "stream=codec_type,width,height",
                "-of", "json",
                url,
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.options.ffprobe, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Transient(format!(
                "ffprobe could not open {}: {}",
                url,
                stderr.trim()
            )));
        }
        parse_probe(&output.stdout)
    }

    /// Spawn one ffmpeg child, keep it in the session and return its stdout.
    fn launch(
        &self,
        session: &mut Session,
        label: &'static str,
        args: Vec<String>,
    ) -> Result<ChildStdout, SourceError> {
        log::debug!("Spawning {} {}", self.options.ffmpeg, args.join(" "));
        let mut child = Command::new(&self.options.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&format!("{} ({})", self.options.ffmpeg, label), e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        session.children.push(child);
        match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => {
                session.threads.push(drain_stderr(label, stderr));
                Ok(stdout)
            }
            _ => Err(SourceError::Transient("ffmpeg pipes not available".into())),
        }
    }

    fn start_decoders(
        &self,
        session: &mut Session,
        url: &str,
        layout: &StreamLayout,
        tx: SyncSender<FrameResult>,
    ) -> Result<(), SourceError> {
        if let Some((width, height)) = layout.video {
            let stdout = self.launch(session, "video", Self::video_args(url, width, height))?;
            let tx = tx.clone();
            session
                .threads
                .push(std::thread::spawn(move || read_video(stdout, width, height, tx)));
            log::info!("Video decoder started: {}x{} gray", width, height);
        }

        if layout.audio {
            let stdout = self.launch(session, "audio", self.audio_args(url))?;
            let format = self.options.audio_format;
            let sample_rate = self.options.sample_rate;
            session
                .threads
                .push(std::thread::spawn(move || read_audio(stdout, format, sample_rate, tx)));
            log::info!(
                "Audio decoder started: stereo {} @ {} Hz",
                format.tag(),
                sample_rate
            );
        }
        Ok(())
    }

    fn video_args(url: &str, width: u32, height: u32) -> Vec<String> {
        let mut args = input_args(url);
        args.extend([
            "-map".into(), "0:v:0".into(),
            // Pin the geometry for this connection; a change is picked up on reopen.
            "-vf".into(), format!("scale={}:{}", width, height),
            "-f".into(), "rawvideo".into(),
            "-pix_fmt".into(), "gray".into(),
            "pipe:1".into(),
        ]);
        args
    }

    fn audio_args(&self, url: &str) -> Vec<String> {
        let mut args = input_args(url);
        args.extend([
            "-map".into(), "0:a:0".into(),
            "-ac".into(), "2".into(),
            "-ar".into(), self.options.sample_rate.to_string(),
            "-f".into(), self.options.audio_format.ffmpeg_muxer().into(),
            "pipe:1".into(),
        ]);
        args
    }
}

impl FrameSource for FfmpegSource {
    fn open(&mut self, url: &str) -> Result<(), SourceError> {
        self.close();

        let layout = self.probe(url)?;
        if layout.video.is_none() && !layout.audio {
            return Err(SourceError::Transient(format!(
                "{} has no audio or video stream",
                url
            )));
        }

        let (tx, rx) = mpsc::sync_channel(FRAME_QUEUE_DEPTH);
        let mut session = Session {
            frames: rx,
            children: Vec::new(),
            threads: Vec::new(),
        };

        if let Err(e) = self.start_decoders(&mut session, url, &layout, tx) {
            session.shutdown();
            return Err(e);
        }

        self.session = Some(session);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| SourceError::Transient("source is not open".into()))?;

        match session.frames.recv_timeout(self.options.stall_timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => Err(SourceError::Transient(format!(
                "no frame decoded within {:?}",
                self.options.stall_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SourceError::Transient("decoders exited".into()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl Session {
    fn shutdown(self) {
        let Session {
            frames,
            mut children,
            threads,
        } = self;
        // Readers blocked on a full queue wake up with a send error.
        drop(frames);
        for child in &mut children {
            let _ = child.kill();
            let _ = child.wait();
        }
        for thread in threads {
            let _ = thread.join();
        }
    }
}

fn input_args(url: &str) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-hide_banner".into(),
        "-loglevel".into(), "error".into(),
        "-i".into(), url.into(),
    ]
}

fn spawn_error(program: &str, err: std::io::Error) -> SourceError {
    if err.kind() == ErrorKind::NotFound {
        SourceError::Fatal(format!("{} not found. Is ffmpeg installed?", program))
    } else {
        SourceError::Transient(format!("failed to run {}: {}", program, err))
    }
}

fn parse_probe(json: &[u8]) -> Result<StreamLayout, SourceError> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| SourceError::Transient(format!("unreadable ffprobe output: {}", e)))?;

    let mut layout = StreamLayout::default();
    for stream in probe.streams {
        match stream.codec_type.as_str() {
            "video" if layout.video.is_none() => {
                if let (Some(w), Some(h)) = (stream.width, stream.height) {
                    if w > 0 && h > 0 {
                        layout.video = Some((w, h));
                    }
                }
            }
            "audio" => layout.audio = true,
            _ => {}
        }
    }
    Ok(layout)
}

fn drain_stderr(label: &'static str, stderr: ChildStderr) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if !line.trim().is_empty() {
                log::warn!("ffmpeg[{}]: {}", label, line);
            }
        }
    })
}

/// Read until EOF or a read error; the last message is always the reason it stopped.
fn end_of_stream(label: &str, err: std::io::Error) -> SourceError {
    if err.kind() == ErrorKind::UnexpectedEof {
        SourceError::Transient(format!("{} decoder ended", label))
    } else {
        SourceError::Transient(format!("{} decoder read failed: {}", label, err))
    }
}

fn read_video(mut stdout: ChildStdout, width: u32, height: u32, tx: SyncSender<FrameResult>) {
    let size = width as usize * height as usize;
    loop {
        let mut luma = vec![0u8; size];
        if let Err(e) = stdout.read_exact(&mut luma) {
            let _ = tx.send(Err(end_of_stream("video", e)));
            return;
        }
        if tx.send(Ok(Frame::Video(VideoFrame::new(width, height, luma)))).is_err() {
            return;
        }
    }
}

fn read_audio(
    mut stdout: ChildStdout,
    format: SampleFormat,
    sample_rate: u32,
    tx: SyncSender<FrameResult>,
) {
    let mut chunk = vec![0u8; AUDIO_CHUNK_FRAMES * 2 * format.width()];
    loop {
        if let Err(e) = stdout.read_exact(&mut chunk) {
            let _ = tx.send(Err(end_of_stream("audio", e)));
            return;
        }
        let planes = deinterleave(&chunk, format.width());
        let frame = AudioFrame::new(format.tag(), sample_rate, planes.into());
        if tx.send(Ok(Frame::Audio(frame))).is_err() {
            return;
        }
    }
}

/// Split interleaved stereo bytes into one plane per channel.
fn deinterleave(interleaved: &[u8], width: usize) -> [Vec<u8>; 2] {
    let samples = interleaved.len() / (2 * width);
    let mut left = Vec::with_capacity(samples * width);
    let mut right = Vec::with_capacity(samples * width);
    for frame in interleaved.chunks_exact(2 * width) {
        left.extend_from_slice(&frame[..width]);
        right.extend_from_slice(&frame[width..]);
    }
    [left, right]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(ffprobe: &str) -> FfmpegOptions {
        FfmpegOptions {
            ffmpeg: "ffmpeg".into(),
            ffprobe: ffprobe.into(),
            sample_rate: 48000,
            audio_format: SampleFormat::S16,
            stall_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn probe_finds_video_geometry_and_audio() {
        let json = br#"{"programs":[],"streams":[
            {"codec_type":"audio"},
            {"codec_type":"video","width":1280,"height":720},
            {"codec_type":"video","width":640,"height":360}
        ]}"#;
        let layout = parse_probe(json).unwrap();
        assert_eq!(
            layout,
            StreamLayout {
                video: Some((1280, 720)),
                audio: true
            }
        );
    }

    #[test]
    fn probe_without_streams_is_empty() {
        assert_eq!(parse_probe(b"{}").unwrap(), StreamLayout::default());
        assert!(parse_probe(b"not json").unwrap_err().is_transient());
    }

    #[test]
    fn deinterleaves_stereo_samples() {
        let interleaved: Vec<u8> = bytemuck::cast_slice(&[1i16, -1, 2, -2, 3, -3]).to_vec();
        let [left, right] = deinterleave(&interleaved, 2);
        let left: Vec<i16> = bytemuck::allocation::pod_collect_to_vec(&left);
        let right: Vec<i16> = bytemuck::allocation::pod_collect_to_vec(&right);
        assert_eq!(left, vec![1, 2, 3]);
        assert_eq!(right, vec![-1, -2, -3]);
    }

    #[test]
    fn audio_args_follow_configured_format() {
        let mut opts = options("ffprobe");
        opts.audio_format = SampleFormat::Dbl;
        let source = FfmpegSource::new(opts);
        let args = source.audio_args("udp://239.0.0.1:1234");
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "f64le"));
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "48000"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn missing_probe_binary_is_fatal() {
        let mut source = FfmpegSource::new(options("/nonexistent/bin/ffprobe"));
        let err = source.open("http://example.invalid/stream.ts").unwrap_err();
        assert!(matches!(err, SourceError::Fatal(_)));
    }

    #[test]
    fn unopened_source_reports_transient() {
        let mut source = FfmpegSource::new(options("ffprobe"));
        assert!(source.next_frame().unwrap_err().is_transient());
    }
}
