use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Span {
    begin_us: f64,
    end_us: f64,
}

#[derive(Debug, Clone)]
struct Sample {
    time_us: f64,
    id: String,
    value: f64,
}

#[derive(Serialize)]
struct TraceFile {
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
    #[serde(rename = "traceEvents")]
    trace_events: Vec<serde_json::Value>,
}

/// Collects duration spans and counter samples; a disabled benchmarker records nothing.
pub struct Benchmarker {
    enabled: bool,
    start: Instant,
    spans: BTreeMap<&'static str, Vec<Span>>,
    samples: BTreeMap<&'static str, Vec<Sample>>,
}

impl Benchmarker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            start: Instant::now(),
            spans: BTreeMap::new(),
            samples: BTreeMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    fn now_us(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000_000.0
    }

    /// Run `f` and record how long it took under `key`.
    pub fn time<T>(&mut self, key: &'static str, f: impl FnOnce() -> T) -> T {
        if !self.enabled {
            return f();
        }
        let begin_us = self.now_us();
        let out = f();
        let end_us = self.now_us();
        self.spans
            .entry(key)
            .or_default()
            .push(Span { begin_us, end_us });
        out
    }

    pub fn add_metric_sample(&mut self, key: &'static str, id: &str, value: f64) {
        if !self.enabled {
            return;
        }
        let time_us = self.now_us();
        self.samples.entry(key).or_default().push(Sample {
            time_us,
            id: id.to_string(),
            value,
        });
    }

    fn events(&self) -> Vec<serde_json::Value> {
        let spans = self.spans.iter().flat_map(|(key, spans)| {
            spans.iter().map(move |s| {
                json!({
                    "name": key,
                    "ph": "X",
                    "ts": s.begin_us,
                    "dur": s.end_us - s.begin_us,
                    "tid": 1,
                    "pid": 1,
                })
            })
        });
        let counters = self.samples.iter().flat_map(|(key, samples)| {
            samples.iter().map(move |s| {
                // Infinite levels are not valid JSON numbers.
                let value = if s.value.is_finite() { json!(s.value) } else { json!(null) };
                json!({
                    "name": key,
                    "ph": "C",
                    "ts": s.time_us,
                    "pid": 1,
                    "args": { s.id.as_str(): value },
                })
            })
        });
        spans.chain(counters).collect()
    }

    /// Write `<stem>.json`. Returns the path written, or `None` when disabled.
    pub fn report(&self, stem: &Path) -> Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        let path = stem.with_extension("json");
        let trace = TraceFile {
            display_time_unit: "ms",
            trace_events: self.events(),
        };
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create trace file {}", path.display()))?;
        serde_json::to_writer(std::io::BufWriter::new(file), &trace)
            .with_context(|| format!("Failed to write trace file {}", path.display()))?;
        log::info!(
            "Wrote {} trace events to {}",
            trace.trace_events.len(),
            path.display()
        );
        Ok(Some(path))
    }
}
