//! Metrics collection and export module

use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Ingest
    pub events_received: IntCounter,
    pub events_duplicate: IntCounter,
    pub events_malformed: IntCounter,

    // Trigger
    pub triggers_fired: IntCounterVec,
    pub triggers_rejected: IntCounterVec,

    // Sessions
    pub sessions_opened: IntCounter,
    pub sessions_closed: IntCounter,
    pub sessions_aborted: IntCounter,
    pub buys: IntCounterVec,
    pub sells: IntCounterVec,
    pub sell_failures: IntCounter,
    pub active_sessions: IntGauge,
    pub active_hold_timers: IntGauge,

    // Relays
    pub relay_wins: IntCounterVec,
    pub relay_failures: IntCounterVec,
    pub nonce_ready: IntGauge,
    pub size_multiplier: Gauge,

    // Histograms
    pub relay_latency: Histogram,
    pub confirmation_latency: Histogram,
    pub build_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_received = IntCounter::with_opts(Opts::new(
            "events_received_total",
            "Swap events received from the feed",
        ))?;
        let events_duplicate = IntCounter::with_opts(Opts::new(
            "events_duplicate_total",
            "Swap events dropped by the signature deduper",
        ))?;
        let events_malformed = IntCounter::with_opts(Opts::new(
            "events_malformed_total",
            "Feed messages that failed to parse",
        ))?;

        let triggers_fired = IntCounterVec::new(
            Opts::new("triggers_fired_total", "Triggers that opened a session"),
            &["class"],
        )?;
        let triggers_rejected = IntCounterVec::new(
            Opts::new("triggers_rejected_total", "Triggers rejected by a gate"),
            &["class", "reason"],
        )?;

        let sessions_opened =
            IntCounter::with_opts(Opts::new("sessions_opened_total", "Sessions created"))?;
        let sessions_closed = IntCounter::with_opts(Opts::new(
            "sessions_closed_total",
            "Sessions fully liquidated",
        ))?;
        let sessions_aborted = IntCounter::with_opts(Opts::new(
            "sessions_aborted_total",
            "Sessions aborted before holding a position",
        ))?;
        let sell_failures = IntCounter::with_opts(Opts::new(
            "sell_failures_total",
            "Liquidations that exhausted every route",
        ))?;
        let buys = IntCounterVec::new(
            Opts::new("buys_total", "Buy submissions by outcome"),
            &["outcome"],
        )?;
        let sells = IntCounterVec::new(
            Opts::new("sells_total", "Sell submissions by outcome"),
            &["outcome"],
        )?;
        let active_sessions =
            IntGauge::with_opts(Opts::new("active_sessions", "Sessions not yet closed"))?;
        let active_hold_timers =
            IntGauge::with_opts(Opts::new("active_hold_timers", "Pending hold timers"))?;

        let relay_wins = IntCounterVec::new(
            Opts::new("relay_wins_total", "Races won per channel"),
            &["channel"],
        )?;
        let relay_failures = IntCounterVec::new(
            Opts::new("relay_failures_total", "Submission failures per channel"),
            &["channel"],
        )?;
        let nonce_ready = IntGauge::with_opts(Opts::new(
            "nonce_ready",
            "Durable nonce accounts with a known hash",
        ))?;
        let size_multiplier = Gauge::with_opts(Opts::new(
            "size_multiplier",
            "Current position size multiplier",
        ))?;

        let relay_latency = Histogram::with_opts(
            HistogramOpts::new("relay_latency_seconds", "Time to first relay acceptance")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from acceptance to confirmation",
            )
            .buckets(vec![0.2, 0.4, 0.8, 1.6, 3.2, 6.4, 8.0]),
        )?;
        let build_latency = Histogram::with_opts(
            HistogramOpts::new("build_latency_seconds", "Transaction build latency")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        )?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(events_duplicate.clone()))?;
        registry.register(Box::new(events_malformed.clone()))?;
        registry.register(Box::new(triggers_fired.clone()))?;
        registry.register(Box::new(triggers_rejected.clone()))?;
        registry.register(Box::new(sessions_opened.clone()))?;
        registry.register(Box::new(sessions_closed.clone()))?;
        registry.register(Box::new(sessions_aborted.clone()))?;
        registry.register(Box::new(buys.clone()))?;
        registry.register(Box::new(sells.clone()))?;
        registry.register(Box::new(sell_failures.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(active_hold_timers.clone()))?;
        registry.register(Box::new(relay_wins.clone()))?;
        registry.register(Box::new(relay_failures.clone()))?;
        registry.register(Box::new(nonce_ready.clone()))?;
        registry.register(Box::new(size_multiplier.clone()))?;
        registry.register(Box::new(relay_latency.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;
        registry.register(Box::new(build_latency.clone()))?;

        Ok(Self {
            registry,
            events_received,
            events_duplicate,
            events_malformed,
            triggers_fired,
            triggers_rejected,
            sessions_opened,
            sessions_closed,
            sessions_aborted,
            buys,
            sells,
            sell_failures,
            active_sessions,
            active_hold_timers,
            relay_wins,
            relay_failures,
            nonce_ready,
            size_multiplier,
            relay_latency,
            confirmation_latency,
            build_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_relay_win(&self, channel: &str, latency_secs: f64) {
        self.relay_wins.with_label_values(&[channel]).inc();
        self.relay_latency.observe(latency_secs);
    }

    pub fn record_relay_failure(&self, channel: &str) {
        self.relay_failures.with_label_values(&[channel]).inc();
    }

    pub fn record_buy(&self, ok: bool) {
        self.buys.with_label_values(&[outcome(ok)]).inc();
    }

    pub fn record_sell(&self, ok: bool) {
        self.sells.with_label_values(&[outcome(ok)]).inc();
    }

    pub fn record_rejection(&self, class: &str, reason: &str) {
        self.triggers_rejected
            .with_label_values(&[class, reason])
            .inc();
    }
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "failed"
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_counters() {
        let m = Metrics::new().unwrap();
        m.record_relay_win("grpc", 0.02);
        m.record_relay_win("grpc", 0.03);
        m.record_relay_failure("bundle");
        m.record_rejection("mint", "balance");
        assert_eq!(m.relay_wins.with_label_values(&["grpc"]).get(), 2);
        assert_eq!(m.relay_failures.with_label_values(&["bundle"]).get(), 1);
        assert_eq!(m.relay_latency.get_sample_count(), 2);
        assert_eq!(
            m.triggers_rejected.with_label_values(&["mint", "balance"]).get(),
            1
        );
    }

    #[test]
    fn test_registry_gathers_all_families() {
        let m = Metrics::new().unwrap();
        m.events_received.inc();
        m.record_relay_win("rpc", 0.01);
        let text = prometheus::TextEncoder::new()
            .encode_to_string(&m.registry().gather())
            .unwrap();
        assert!(text.contains("events_received_total 1"));
        assert!(text.contains("relay_wins_total{channel=\"rpc\"} 1"));
    }
}
