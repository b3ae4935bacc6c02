use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static SIMPLIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HISTORY_WRITES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("legalese_http_requests_total", "API HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create legalese_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "legalese_http_request_duration_seconds",
                    "API HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create legalese_http_request_duration_seconds"),
        )
    })
}

fn simplifications_total() -> &'static IntCounterVec {
    SIMPLIFICATIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "legalese_simplifications_total",
                    "Simplification requests by outcome.",
                ),
                &["outcome"],
            )
            .expect("create legalese_simplifications_total"),
        )
    })
}

fn history_writes_total() -> &'static IntCounterVec {
    HISTORY_WRITES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "legalese_history_writes_total",
                    "History record writes by outcome.",
                ),
                &["outcome"],
            )
            .expect("create legalese_history_writes_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

/// `outcome` is one of `ok`, `invalid`, `unavailable`, `failed`.
pub fn observe_simplification(outcome: &str) {
    simplifications_total().with_label_values(&[outcome]).inc();
}

/// `outcome` is one of `ok`, `skipped`, `error`.
pub fn observe_history_write(outcome: &str) {
    history_writes_total().with_label_values(&[outcome]).inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = simplifications_total();
    let _ = history_writes_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
