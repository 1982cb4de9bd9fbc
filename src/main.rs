mod audio;
mod cli;
mod config;
mod error;
mod frame;
mod logging;
mod metrics;
mod probe;
mod source;
mod trace;
mod video;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use audio::AudioAnalysisBuffer;
use cli::Cli;
use config::Config;
use metrics::PrometheusSink;
use probe::{IngestLoop, ProbeSettings};
use source::ffmpeg::{FfmpegOptions, FfmpegSource};
use trace::Benchmarker;
use video::VideoAnalysisBuffer;

fn main() -> Result<()> {
    let level = logging::parse_level(std::env::var("LOG_LEVEL").ok().as_deref())?;
    logging::init(level);

    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(config::find_config);
    let mut config = match config_path {
        Some(ref path) => {
            let config = config::load_config(path)?;
            log::info!("Loaded config from {}", path.display());
            config
        }
        None => Config::default(),
    };
    config.apply_cli(&cli);
    config.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            if shutdown.swap(true, Ordering::SeqCst) {
                log::warn!("Second interrupt, exiting immediately");
                std::process::exit(130);
            }
            log::info!("Interrupt received, shutting down");
        })
        .context("Failed to install signal handler")?;
    }

    let sink = PrometheusSink::new(&config.metrics.namespace)
        .context("Failed to register metrics")?;
    let _server = metrics::serve(config.metrics.port, sink.registry().clone())?;

    let source = FfmpegSource::new(FfmpegOptions {
        ffmpeg: config.source.ffmpeg.clone(),
        ffprobe: config.source.ffprobe.clone(),
        sample_rate: config.audio.sample_rate,
        audio_format: config.source.audio_format,
        stall_timeout: config.stall_timeout(),
    });
    let audio = AudioAnalysisBuffer::new(config.audio.window_seconds, config.audio.sample_rate)
        .context("Failed to set up loudness meter")?;
    let video = VideoAnalysisBuffer::new(config.video.ring_frames);
    log::info!(
        "Audio window {} samples at {} Hz, video ring {} frames, sampling every {} frame(s)",
        audio.capacity(),
        config.audio.sample_rate,
        video.capacity(),
        config.analysis.sample_interval
    );

    let settings = ProbeSettings {
        url: config.source.url.clone(),
        sample_interval: config.analysis.sample_interval,
        format_policy: config.analysis.on_unsupported_format,
        reconnect_delay: config.reconnect_delay(),
    };
    let mut probe = IngestLoop::new(source, sink, audio, video, settings, shutdown)
        .with_benchmarker(Benchmarker::new(cli.trace.is_some()));

    let outcome = probe.start();
    log::info!(
        "Probe {:?} after {} audio samples, {} video frames held",
        probe.state(),
        probe.audio().samples_written(),
        probe.video().len()
    );

    if let Some(ref stem) = cli.trace {
        if let Err(e) = probe.benchmarker().report(stem) {
            log::warn!("Failed to write trace: {:#}", e);
        }
    }

    outcome?;
    Ok(())
}
