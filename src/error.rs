use thiserror::Error;

/// Outcome of opening the stream or pulling a frame from it.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Recoverable: close, reopen, carry on.
    #[error("transient source error: {0}")]
    Transient(String),
    #[error("fatal source error: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("expected a stereo frame, got {0} channel(s)")]
    ChannelCount(usize),
    #[error("plane of {len} bytes is not a whole number of {width}-byte samples")]
    MalformedPlane { len: usize, width: usize },
    #[error("channel planes differ in length: left {left} samples, right {right} samples")]
    PlaneLengthMismatch { left: usize, right: usize },
    #[error("luma plane has {actual} bytes, {width}x{height} needs {expected}")]
    LumaSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported channel: {0}")]
    InvalidChannel(usize),
    #[error("loudness meter unavailable: {0}")]
    Meter(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Anything that moves the ingest loop to `Terminated` without a shutdown request.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("analysis aborted: {0}")]
    Analysis(#[from] AnalysisError),
}
