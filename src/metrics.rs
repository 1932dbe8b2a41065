//! Metrics Collector
//!
//! Prometheus collectors for request round trips, task outcomes, response
//! cache lookups, pipeline rejections and in-memory store occupancy. Each
//! collector owns its registry.
//! Recording never fails the caller: label or encoding errors are dropped.

use std::time::Duration;

use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

use crate::cache::StoreStats;
use crate::error::{Error, Result};

const NAMESPACE: &str = "gateway";

/// Collects per-request and dispatcher metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    requests_total: CounterVec,
    request_duration: HistogramVec,
    request_size: HistogramVec,
    response_size: HistogramVec,
    rejections_total: CounterVec,
    response_cache_total: CounterVec,
    tasks_total: CounterVec,
    dead_letters_total: CounterVec,
    store_entries: IntGaugeVec,
    store_removals: IntGaugeVec,
    store_hit_ratio: Gauge,
}

impl MetricsCollector {
    /// Creates and registers every collector.
    ///
    /// # Errors
    /// Returns `Error::Internal` if a collector cannot be registered.
    pub fn new() -> Result<Self> {
        Self::build().map_err(|e| Error::Internal(format!("Metrics registration failed: {}", e)))
    }

    fn build() -> std::result::Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests").namespace(NAMESPACE),
            &["method", "route", "status"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .namespace(NAMESPACE)
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "route"],
        )?;

        let size_buckets = exponential_buckets(64.0, 4.0, 8)?;
        let request_size = HistogramVec::new(
            HistogramOpts::new("http_request_size_bytes", "HTTP request body size")
                .namespace(NAMESPACE)
                .buckets(size_buckets.clone()),
            &["method", "route"],
        )?;
        let response_size = HistogramVec::new(
            HistogramOpts::new("http_response_size_bytes", "HTTP response body size")
                .namespace(NAMESPACE)
                .buckets(size_buckets),
            &["method", "route"],
        )?;

        let rejections_total = CounterVec::new(
            Opts::new(
                "rejected_requests_total",
                "Requests short-circuited by the pipeline",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;

        let response_cache_total = CounterVec::new(
            Opts::new("response_cache_total", "Response cache lookups").namespace(NAMESPACE),
            &["result"],
        )?;

        let tasks_total = CounterVec::new(
            Opts::new("tasks_total", "Work item handler outcomes").namespace(NAMESPACE),
            &["kind", "outcome"],
        )?;

        let dead_letters_total = CounterVec::new(
            Opts::new("dead_letters_total", "Work items moved to the dead-letter sink")
                .namespace(NAMESPACE),
            &["kind"],
        )?;

        let store_entries = IntGaugeVec::new(
            Opts::new("store_entries", "Entries held by the in-memory store").namespace(NAMESPACE),
            &["table"],
        )?;
        let store_removals = IntGaugeVec::new(
            Opts::new(
                "store_removals",
                "Entries the in-memory store has dropped since start",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;
        let store_hit_ratio = Gauge::with_opts(
            Opts::new("store_hit_ratio", "In-memory store reads that found a live value")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(request_size.clone()))?;
        registry.register(Box::new(response_size.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(response_cache_total.clone()))?;
        registry.register(Box::new(tasks_total.clone()))?;
        registry.register(Box::new(dead_letters_total.clone()))?;
        registry.register(Box::new(store_entries.clone()))?;
        registry.register(Box::new(store_removals.clone()))?;
        registry.register(Box::new(store_hit_ratio.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            request_size,
            response_size,
            rejections_total,
            response_cache_total,
            tasks_total,
            dead_letters_total,
            store_entries,
            store_removals,
            store_hit_ratio,
        })
    }

    // == Request Metrics ==
    /// Records one request round trip.
    pub fn observe(
        &self,
        method: &str,
        route: &str,
        status: u16,
        duration: Duration,
        request_bytes: u64,
        response_bytes: u64,
    ) {
        let status = status.to_string();
        if let Ok(counter) = self
            .requests_total
            .get_metric_with_label_values(&[method, route, status.as_str()])
        {
            counter.inc();
        }
        if let Ok(histogram) = self
            .request_duration
            .get_metric_with_label_values(&[method, route])
        {
            histogram.observe(duration.as_secs_f64());
        }
        if let Ok(histogram) = self.request_size.get_metric_with_label_values(&[method, route]) {
            histogram.observe(request_bytes as f64);
        }
        if let Ok(histogram) = self.response_size.get_metric_with_label_values(&[method, route]) {
            histogram.observe(response_bytes as f64);
        }
    }

    /// Counts a request rejected before reaching its handler.
    pub fn record_rejection(&self, reason: &str) {
        if let Ok(counter) = self.rejections_total.get_metric_with_label_values(&[reason]) {
            counter.inc();
        }
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        if let Ok(counter) = self.response_cache_total.get_metric_with_label_values(&[result]) {
            counter.inc();
        }
    }

    // == Dispatcher Metrics ==
    pub fn record_task(&self, kind: &str, outcome: &str) {
        if let Ok(counter) = self.tasks_total.get_metric_with_label_values(&[kind, outcome]) {
            counter.inc();
        }
    }

    pub fn record_dead_letter(&self, kind: &str) {
        if let Ok(counter) = self.dead_letters_total.get_metric_with_label_values(&[kind]) {
            counter.inc();
        }
    }

    // == Store Metrics ==
    /// Mirrors a snapshot of the in-memory store counters.
    pub fn record_store_stats(&self, stats: &StoreStats) {
        let gauges = [
            (&self.store_entries, "cache", stats.total_entries as i64),
            (&self.store_entries, "rate_window", stats.open_windows as i64),
            (&self.store_removals, "eviction", stats.evictions as i64),
            (&self.store_removals, "expiration", stats.expirations as i64),
        ];
        for (vec, label, value) in gauges {
            if let Ok(gauge) = vec.get_metric_with_label_values(&[label]) {
                gauge.set(value);
            }
        }
        self.store_hit_ratio.set(stats.hit_rate());
    }

    // == Export ==
    /// Renders every collector in the Prometheus text format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            return format!("# Error encoding metrics: {}\n", e);
        }
        String::from_utf8(buffer).unwrap_or_else(|e| format!("# Error encoding metrics: {}\n", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_is_exported() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.observe("GET", "/health", 200, Duration::from_millis(3), 0, 15);
        metrics.observe("GET", "/health", 200, Duration::from_millis(4), 0, 15);

        let text = metrics.export();
        assert!(text.contains(
            r#"gateway_http_requests_total{method="GET",route="/health",status="200"} 2"#
        ));
        assert!(text.contains("gateway_http_request_duration_seconds_bucket"));
        assert!(text.contains("gateway_http_response_size_bytes_sum"));
    }

    #[test]
    fn test_task_and_pipeline_counters() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_task("process_message", "retry");
        metrics.record_dead_letter("process_message");
        metrics.record_rejection("rate_limited");
        metrics.record_cache_lookup(true);

        let text = metrics.export();
        assert!(text.contains(r#"gateway_tasks_total{kind="process_message",outcome="retry"} 1"#));
        assert!(text.contains(r#"gateway_dead_letters_total{kind="process_message"} 1"#));
        assert!(text.contains(r#"gateway_rejected_requests_total{reason="rate_limited"} 1"#));
        assert!(text.contains(r#"gateway_response_cache_total{result="hit"} 1"#));
    }

    #[test]
    fn test_collectors_are_independent() {
        let a = MetricsCollector::new().unwrap();
        let b = MetricsCollector::new().unwrap();
        a.record_rejection("auth");

        assert!(!b.export().contains("rejected_requests_total{"));
    }

    #[test]
    fn test_store_stats_are_exported() {
        let metrics = MetricsCollector::new().unwrap();
        let stats = StoreStats {
            hits: 3,
            misses: 1,
            evictions: 2,
            expirations: 5,
            total_entries: 40,
            open_windows: 7,
        };
        metrics.record_store_stats(&stats);

        let text = metrics.export();
        assert!(text.contains(r#"gateway_store_entries{table="cache"} 40"#));
        assert!(text.contains(r#"gateway_store_entries{table="rate_window"} 7"#));
        assert!(text.contains(r#"gateway_store_removals{reason="eviction"} 2"#));
        assert!(text.contains("gateway_store_hit_ratio 0.75"));
    }
}
