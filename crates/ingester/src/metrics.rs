use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

const LATENCY_BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

struct IngesterMetrics {
    registry: Registry,
    http_requests: IntCounterVec,
    http_latency: HistogramVec,
    pipeline_failures: IntCounterVec,
    policy_denials: IntCounter,
}

static METRICS: OnceLock<IngesterMetrics> = OnceLock::new();

fn metrics() -> &'static IngesterMetrics {
    METRICS.get_or_init(|| {
        let http_requests = IntCounterVec::new(
            Opts::new("enricher_http_requests_total", "Ingester HTTP request count."),
            &["route", "method", "status"],
        )
        .expect("create enricher_http_requests_total");
        let http_latency = HistogramVec::new(
            HistogramOpts::new(
                "enricher_http_request_duration_seconds",
                "Ingester HTTP request duration in seconds.",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["route", "method", "outcome"],
        )
        .expect("create enricher_http_request_duration_seconds");
        let pipeline_failures = IntCounterVec::new(
            Opts::new(
                "enricher_pipeline_failures_total",
                "Dispatch pipeline failures by stage.",
            ),
            &["stage"],
        )
        .expect("create enricher_pipeline_failures_total");
        let policy_denials = IntCounter::new(
            "enricher_policy_denials_total",
            "Outbound destinations rejected by the network allowlist.",
        )
        .expect("create enricher_policy_denials_total");

        let registry = Registry::new();
        for collector in [
            Box::new(http_requests.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(http_latency.clone()),
            Box::new(pipeline_failures.clone()),
            Box::new(policy_denials.clone()),
        ] {
            let _ = registry.register(collector);
        }

        IngesterMetrics {
            registry,
            http_requests,
            http_latency,
            pipeline_failures,
            policy_denials,
        }
    })
}

/// Anything below 400 counts as a successful outcome.
pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let m = metrics();
    let status_label = status.to_string();
    m.http_requests
        .with_label_values(&[route, method, status_label.as_str()])
        .inc();

    let outcome = if status < 400 { "success" } else { "error" };
    m.http_latency
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn inc_pipeline_failure(stage: &str) {
    metrics().pipeline_failures.with_label_values(&[stage]).inc();
}

pub fn inc_policy_denial() {
    metrics().policy_denials.inc();
}

/// Text exposition of every series plus its content type.
pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&metrics().registry.gather(), &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
