// Prometheus metrics definitions for the tournament backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Match simulation worker threads currently active.
    pub static ref MATCH_WORKERS_ACTIVE: IntGauge =
        IntGauge::new("dilemma_match_workers_active", "Match workers currently active").unwrap();

    /// Tournaments currently in the running state.
    pub static ref TOURNAMENTS_RUNNING: IntGauge =
        IntGauge::new("dilemma_tournaments_running", "Tournaments currently running").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total matches started.
    pub static ref MATCHES_STARTED_TOTAL: IntCounter =
        IntCounter::new("dilemma_matches_started_total", "Total matches started").unwrap();

    /// Total matches completed.
    pub static ref MATCHES_COMPLETED_TOTAL: IntCounter =
        IntCounter::new("dilemma_matches_completed_total", "Total matches completed").unwrap();

    /// Sandbox faults absorbed as forced defects, by kind
    /// (timeout, runtime, invalid_move).
    pub static ref SANDBOX_FAULTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("dilemma_sandbox_faults_total", "Sandbox faults absorbed"),
        &["kind"],
    )
    .unwrap();

    /// Strategy submissions rejected by static screening.
    pub static ref STRATEGY_REJECTIONS_TOTAL: IntCounter = IntCounter::new(
        "dilemma_strategy_rejections_total",
        "Strategy submissions rejected by screening",
    )
    .unwrap();

    /// Tournaments that reached the completed state.
    pub static ref TOURNAMENTS_COMPLETED_TOTAL: IntCounter = IntCounter::new(
        "dilemma_tournaments_completed_total",
        "Tournaments completed",
    )
    .unwrap();

    /// Tournaments that reached the failed state.
    pub static ref TOURNAMENTS_FAILED_TOTAL: IntCounter =
        IntCounter::new("dilemma_tournaments_failed_total", "Tournaments failed").unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Single decide() invocation time in milliseconds.
    pub static ref DECIDE_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("dilemma_decide_duration_ms", "decide() invocation time in ms")
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
    )
    .unwrap();

    /// Full match simulation time in seconds.
    pub static ref MATCH_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("dilemma_match_duration_seconds", "Match duration in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MATCH_WORKERS_ACTIVE.clone()),
        Box::new(TOURNAMENTS_RUNNING.clone()),
        Box::new(MATCHES_STARTED_TOTAL.clone()),
        Box::new(MATCHES_COMPLETED_TOTAL.clone()),
        Box::new(SANDBOX_FAULTS_TOTAL.clone()),
        Box::new(STRATEGY_REJECTIONS_TOTAL.clone()),
        Box::new(TOURNAMENTS_COMPLETED_TOTAL.clone()),
        Box::new(TOURNAMENTS_FAILED_TOTAL.clone()),
        Box::new(DECIDE_DURATION_MS.clone()),
        Box::new(MATCH_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        // Repeated registration (tests call this per case) is a no-op.
        let _ = REGISTRY.register(c);
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("dilemma_"));
    }

    #[test]
    fn test_metric_increments() {
        MATCH_WORKERS_ACTIVE.set(2);
        assert_eq!(MATCH_WORKERS_ACTIVE.get(), 2);
        MATCH_WORKERS_ACTIVE.set(0);

        MATCHES_STARTED_TOTAL.inc();
        MATCHES_COMPLETED_TOTAL.inc();
        STRATEGY_REJECTIONS_TOTAL.inc();
        TOURNAMENTS_COMPLETED_TOTAL.inc();
        TOURNAMENTS_FAILED_TOTAL.inc();

        SANDBOX_FAULTS_TOTAL.with_label_values(&["timeout"]).inc();
        SANDBOX_FAULTS_TOTAL.with_label_values(&["runtime"]).inc();

        DECIDE_DURATION_MS.observe(1.2);
        MATCH_DURATION_SECONDS.observe(0.3);
    }
}
