use log::LevelFilter;
use std::io::{IsTerminal, Write};

use crate::error::ConfigError;

const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warning", "warn", "error", "critical"];

/// Parse a `LOG_LEVEL` value. Unset means `info`.
pub fn parse_level(value: Option<&str>) -> Result<LevelFilter, ConfigError> {
    let Some(value) = value else {
        return Ok(LevelFilter::Info);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(LevelFilter::Trace),
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warning" | "warn" => Ok(LevelFilter::Warn),
        "error" | "critical" => Ok(LevelFilter::Error),
        other => Err(ConfigError::Invalid(format!(
            "invalid log level '{}', valid levels are: {}",
            other,
            VALID_LEVELS.join(", ")
        ))),
    }
}

/// Human-readable lines on a terminal, one JSON object per line otherwise.
pub fn init(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp_millis();

    if !std::io::stderr().is_terminal() {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "timestamp": buf.timestamp_millis().to_string(),
                "level": record.level().as_str().to_ascii_lowercase(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }

    builder.init();
}
