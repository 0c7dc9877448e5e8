use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::time::Duration;

/// Metric name prefix for all engine metrics
const PREFIX: &str = "smartlist";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Refresh Metrics
    pub static ref REFRESH_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_refresh_executions_total"), "Refresh executions by outcome"),
        &["status"]
    ).expect("Failed to create refresh_executions_total metric");

    pub static ref REFRESH_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_refresh_duration_seconds"),
            "Refresh execution duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0])
    ).expect("Failed to create refresh_duration_seconds metric");

    pub static ref REFRESH_QUEUE_DEPTH: Gauge = Gauge::new(
        format!("{PREFIX}_refresh_queue_depth"),
        "Refreshes queued or running"
    ).expect("Failed to create refresh_queue_depth metric");

    pub static ref STALE_ERROR_COLLECTIONS: Gauge = Gauge::new(
        format!("{PREFIX}_stale_error_collections"),
        "Collections parked in stale-error state"
    ).expect("Failed to create stale_error_collections metric");

    // Dispatcher Metrics
    pub static ref DISPATCHER_EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_dispatcher_events_total"), "Catalog events processed by the dispatcher"),
        &["event"]
    ).expect("Failed to create dispatcher_events_total metric");

    // Sweeper Metrics
    pub static ref SWEEPER_ENQUEUED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_sweeper_enqueued_total"),
        "Stale collections enqueued by the sweeper"
    ).expect("Failed to create sweeper_enqueued_total metric");
}

/// Register all metrics with the Prometheus registry.
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(REFRESH_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REFRESH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(REFRESH_QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(STALE_ERROR_COLLECTIONS.clone()));
    let _ = REGISTRY.register(Box::new(DISPATCHER_EVENTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SWEEPER_ENQUEUED_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a finished refresh execution.
pub fn record_refresh(status: &str, duration: Duration) {
    REFRESH_EXECUTIONS_TOTAL.with_label_values(&[status]).inc();
    REFRESH_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Record a catalog event handled by the dispatcher.
pub fn record_dispatcher_event(event: &str) {
    DISPATCHER_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_refresh() {
        init_metrics();
        let before = REFRESH_EXECUTIONS_TOTAL
            .with_label_values(&["success"])
            .get();
        record_refresh("success", Duration::from_millis(5));
        let after = REFRESH_EXECUTIONS_TOTAL
            .with_label_values(&["success"])
            .get();
        assert_eq!(after, before + 1.0);
    }
}
