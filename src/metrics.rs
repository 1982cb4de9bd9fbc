use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gauge {
    VideoBrightness,
    VideoMotion,
    AudioLoudnessLufs,
    AudioLevelDbfs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    DecodeErrors,
    Frames,
}

impl Gauge {
    pub const ALL: [Gauge; 4] = [
        Gauge::VideoBrightness,
        Gauge::VideoMotion,
        Gauge::AudioLoudnessLufs,
        Gauge::AudioLevelDbfs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Gauge::VideoBrightness => "video_brightness",
            Gauge::VideoMotion => "video_motion",
            Gauge::AudioLoudnessLufs => "audio_loudness_lufs",
            Gauge::AudioLevelDbfs => "audio_level_dbfs",
        }
    }

    fn help(self) -> &'static str {
        match self {
            Gauge::VideoBrightness => "Average video brightness",
            Gauge::VideoMotion => "Amount of motion in the video buffer",
            Gauge::AudioLoudnessLufs => "Integrated audio loudness in LUFS, 0 until the window is full",
            Gauge::AudioLevelDbfs => "Audio level of the first channel in dBFS",
        }
    }
}

impl Counter {
    pub const ALL: [Counter; 2] = [Counter::DecodeErrors, Counter::Frames];

    pub fn name(self) -> &'static str {
        match self {
            Counter::DecodeErrors => "decode_errors_total",
            Counter::Frames => "frames_total",
        }
    }

    fn help(self) -> &'static str {
        match self {
            Counter::DecodeErrors => "Total number of decode errors",
            Counter::Frames => "Total number of video frames received",
        }
    }
}

/// Where computed values go.
pub trait MetricsSink {
    fn set_gauge(&self, gauge: Gauge, value: f64);
    fn increment_counter(&self, counter: Counter);
}

/// Sink backed by a Prometheus registry.
#[derive(Clone)]
pub struct PrometheusSink {
    gauges: Vec<(Gauge, prometheus::Gauge)>,
    counters: Vec<(Counter, IntCounter)>,
    registry: Registry,
}

impl PrometheusSink {
    /// Register all probe metrics in a fresh registry. An empty namespace
    /// exports the bare metric names.
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| {
            let opts = Opts::new(name, help);
            if namespace.is_empty() {
                opts
            } else {
                opts.namespace(namespace)
            }
        };

        let mut gauges = Vec::with_capacity(Gauge::ALL.len());
        for gauge in Gauge::ALL {
            let metric = prometheus::Gauge::with_opts(opts(gauge.name(), gauge.help()))?;
            registry.register(Box::new(metric.clone()))?;
            gauges.push((gauge, metric));
        }

        let mut counters = Vec::with_capacity(Counter::ALL.len());
        for counter in Counter::ALL {
            let metric = IntCounter::with_opts(opts(counter.name(), counter.help()))?;
            registry.register(Box::new(metric.clone()))?;
            counters.push((counter, metric));
        }

        Ok(Self {
            gauges,
            counters,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl MetricsSink for PrometheusSink {
    fn set_gauge(&self, gauge: Gauge, value: f64) {
        if let Some((_, metric)) = self.gauges.iter().find(|(g, _)| *g == gauge) {
            metric.set(value);
        }
    }

    fn increment_counter(&self, counter: Counter) {
        if let Some((_, metric)) = self.counters.iter().find(|(c, _)| *c == counter) {
            metric.inc();
        }
    }
}

/// Text exposition of everything in the registry.
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    match render(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Serve `GET /metrics` on `port` from a background thread.
///
/// The port is bound before returning so a taken port fails startup.
pub fn serve(port: u16, registry: Registry) -> Result<JoinHandle<()>> {
    let listener = std::net::TcpListener::bind(("0.0.0.0", port))
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    listener
        .set_nonblocking(true)
        .context("Failed to configure metrics listener")?;

    let handle = std::thread::Builder::new()
        .name("metrics-http".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::error!("Failed to start metrics runtime: {}", e);
                    return;
                }
            };

            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(e) => {
                        log::error!("Failed to adopt metrics listener: {}", e);
                        return;
                    }
                };
                if let Err(e) = axum::serve(listener, router(registry)).await {
                    log::error!("Metrics server stopped: {}", e);
                }
            });
        })
        .context("Failed to spawn metrics thread")?;

    log::info!("Serving metrics on 0.0.0.0:{}/metrics", port);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_namespaced_names() {
        let sink = PrometheusSink::new("tsprobe").unwrap();
        sink.set_gauge(Gauge::VideoBrightness, 0.25);
        sink.increment_counter(Counter::Frames);
        sink.increment_counter(Counter::Frames);

        let text = render(sink.registry()).unwrap();
        assert!(text.contains("tsprobe_video_brightness 0.25"));
        assert!(text.contains("tsprobe_frames_total 2"));
        assert!(text.contains("tsprobe_decode_errors_total 0"));
        assert!(text.contains("tsprobe_audio_level_dbfs"));
    }

    #[test]
    fn empty_namespace_keeps_bare_names() {
        let sink = PrometheusSink::new("").unwrap();
        sink.set_gauge(Gauge::AudioLoudnessLufs, -23.0);
        let text = render(sink.registry()).unwrap();
        assert!(text.contains("\naudio_loudness_lufs -23"));
    }

    #[test]
    fn negative_infinity_is_exported() {
        let sink = PrometheusSink::new("tsprobe").unwrap();
        sink.set_gauge(Gauge::AudioLevelDbfs, f64::NEG_INFINITY);
        let text = render(sink.registry()).unwrap();
        let sample = text
            .lines()
            .find(|line| line.starts_with("tsprobe_audio_level_dbfs "))
            .unwrap();
        let value: f64 = sample.rsplit(' ').next().unwrap().parse().unwrap();
        assert!(value.is_infinite() && value < 0.0);
    }

    #[test]
    fn taken_port_fails_to_serve() {
        let blocker = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = blocker.local_addr().unwrap().port();
        let sink = PrometheusSink::new("tsprobe").unwrap();
        assert!(serve(port, sink.registry().clone()).is_err());
    }
}
