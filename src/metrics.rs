use prometheus::{Encoder, TextEncoder, HistogramVec, IntCounter, IntCounterVec, GaugeVec, Opts, Registry};
use warp::Filter;
use std::net::SocketAddr;
use once_cell::sync::{Lazy, OnceCell};

use crate::checker::{CheckResult, CheckStatus};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static LATENCY_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new("liveness_check_latency_milliseconds_current", "Latency of the last liveness check in milliseconds");
    let gauge = GaugeVec::new(opts, &["result"]).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

static CHECK_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("liveness_check_total", "Total number of liveness checks");
    let ctr = IntCounterVec::new(opts, &["result", "message"]).unwrap();
    REGISTRY.register(Box::new(ctr.clone())).unwrap();
    ctr
});

static TIMEOUT_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    let ctr = IntCounter::new("liveness_check_timeout_total", "Total number of liveness checks ended by the timeout").unwrap();
    REGISTRY.register(Box::new(ctr.clone())).unwrap();
    ctr
});

// Only set when latency history is enabled
static LATENCY_HIST: OnceCell<HistogramVec> = OnceCell::new();

pub fn initialize_metrics(enable_latency_history: bool) -> prometheus::Result<()> {
    Lazy::force(&LATENCY_GAUGE);
    Lazy::force(&CHECK_COUNTER);
    Lazy::force(&TIMEOUT_COUNTER);

    if enable_latency_history && LATENCY_HIST.get().is_none() {
        let opts = Opts::new("liveness_check_latency_milliseconds", "Liveness check latency in milliseconds");
        let hist = HistogramVec::new(
            prometheus::HistogramOpts {
                common_opts: opts,
                buckets: vec![
                    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0,
                    1000.0, 2500.0, 5000.0, 10000.0, 15000.0
                ],
            },
            &["result"],
        )?;
        REGISTRY.register(Box::new(hist.clone()))?;
        let _ = LATENCY_HIST.set(hist);
    }
    Ok(())
}

fn result_label(result: &CheckResult) -> &'static str {
    match result.status {
        CheckStatus::Error => "error",
        CheckStatus::Code(_) if result.alive => "alive",
        CheckStatus::Code(_) => "dead",
    }
}

pub fn observe_check(result: &CheckResult) {
    let label = result_label(result);
    let latency_ms = result.response_time as f64;

    CHECK_COUNTER
        .with_label_values(&[label, result.message.as_str()])
        .inc();
    LATENCY_GAUGE
        .with_label_values(&[label])
        .set(latency_ms);

    if let Some(hist) = LATENCY_HIST.get() {
        hist.with_label_values(&[label]).observe(latency_ms);
    }

    if result.failure == Some(crate::checker::classify::FailureKind::Timeout) {
        TIMEOUT_COUNTER.inc();
    }
}

pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    let mut buf = Vec::new();
    encoder.encode(&mf, &mut buf)?;
    Ok((encoder.format_type().to_string(), buf))
}

pub fn metrics_route() -> impl Filter<Extract = (warp::http::Response<Vec<u8>>,), Error = warp::Rejection> + Clone {
    warp::path!("metrics").and(warp::get()).map(|| {
        let (status, content_type, body) = match render() {
            Ok((content_type, buf)) => (warp::http::StatusCode::OK, content_type, buf),
            Err(e) => {
                tracing::error!("encoding metrics failed: {:?}", e);
                (warp::http::StatusCode::INTERNAL_SERVER_ERROR, "text/plain".to_string(), Vec::new())
            }
        };
        let mut resp = warp::http::Response::new(body);
        *resp.status_mut() = status;
        if let Ok(value) = warp::http::HeaderValue::from_str(&content_type) {
            resp.headers_mut().insert(warp::http::header::CONTENT_TYPE, value);
        }
        resp
    })
}

pub async fn serve_metrics(addr: SocketAddr) {
    warp::serve(metrics_route()).run(addr).await;
}
