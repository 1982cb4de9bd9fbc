use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tsprobe", about = "Live transport-stream quality probe with Prometheus metrics")]
pub struct Cli {
    /// Config file (TOML). Defaults to ./tsprobe.toml or ~/.config/tsprobe/config.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stream URL to monitor
    #[arg(short, long, env = "VIDEO_URL")]
    pub url: Option<String>,

    /// Port for the Prometheus scrape endpoint
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Audio analysis window in seconds
    #[arg(long)]
    pub audio_window: Option<f64>,

    /// Number of video frames kept for brightness and motion
    #[arg(long)]
    pub video_frames: Option<usize>,

    /// Analyse and publish every Nth frame of each kind
    #[arg(long)]
    pub sample_interval: Option<u64>,

    /// Write a Chrome trace of analysis timings to <TRACE>.json on exit
    #[arg(long)]
    pub trace: Option<PathBuf>,
}
