//! Prometheus metrics for the harvester
//!
//! This module tracks:
//! - External API calls by operation and outcome, quota units consumed,
//!   quota failures and cooling credentials
//! - Playlists ingested per mode, rows upserted per table
//! - Ticks by outcome, per-region duration, current day in cycle
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all harvester metrics
struct HarvestMetrics {
    api_calls: CounterVec,
    quota_units: CounterVec,
    quota_failures: Counter,
    credentials_cooling: Gauge,
    playlists_ingested: CounterVec,
    rows_upserted: CounterVec,
    ticks: CounterVec,
    region_duration: HistogramVec,
    cycle_day: Gauge,
}

/// Global storage for harvester metrics
static HARVEST_METRICS: OnceLock<HarvestMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
/// If metric registration fails, subsequent metric operations are no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = playlist_harvester::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics disabled");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = HarvestMetrics {
        api_calls: register_counter_vec!(
            "harvest_api_calls_total",
            "External API calls by operation and outcome",
            &["operation", "outcome"]
        )?,
        quota_units: register_counter_vec!(
            "harvest_quota_units_total",
            "Quota units consumed by operation",
            &["operation"]
        )?,
        quota_failures: register_counter!(
            "harvest_quota_failures_total",
            "Quota-exceeded responses that put a credential into cooldown"
        )?,
        credentials_cooling: register_gauge!(
            "harvest_credentials_cooling",
            "Credentials currently cooling down"
        )?,
        playlists_ingested: register_counter_vec!(
            "harvest_playlists_ingested_total",
            "Playlists fully ingested by mode",
            &["mode"]
        )?,
        rows_upserted: register_counter_vec!(
            "harvest_rows_upserted_total",
            "Rows upserted by table",
            &["table"]
        )?,
        ticks: register_counter_vec!(
            "harvest_ticks_total",
            "Scheduler ticks by outcome",
            &["outcome"]
        )?,
        region_duration: register_histogram_vec!(
            "harvest_region_duration_seconds",
            "Time spent on one region in seconds",
            &["region", "mode"],
            vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 90.0, 120.0, 300.0]
        )?,
        cycle_day: register_gauge!("harvest_cycle_day", "Current day in cycle")?,
    };

    HARVEST_METRICS
        .set(metrics)
        .map_err(|_| "Harvest metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one external API call
pub fn record_api_call(operation: &str, outcome: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.api_calls.with_label_values(&[operation, outcome]).inc();
    }
}

/// Record quota units charged to a credential
pub fn record_quota_units(operation: &str, units: u64) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    if units > 0 {
        m.quota_units
            .with_label_values(&[operation])
            .inc_by(units as f64);
    }
}

/// Record a quota failure
pub fn record_quota_failure() {
    if let Some(m) = HARVEST_METRICS.get() {
        m.quota_failures.inc();
    }
}

pub fn set_credentials_cooling(count: usize) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.credentials_cooling.set(count as f64);
    }
}

/// Record playlists ingested in one mode
pub fn record_playlists_ingested(mode: &str, count: u64) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    if count > 0 {
        m.playlists_ingested
            .with_label_values(&[mode])
            .inc_by(count as f64);
    }
}

/// Record rows upserted into one table
pub fn record_rows_upserted(table: &str, count: usize) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    if count > 0 {
        m.rows_upserted
            .with_label_values(&[table])
            .inc_by(count as f64);
    }
}

/// Record a finished tick
pub fn record_tick(outcome: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.ticks.with_label_values(&[outcome]).inc();
    }
}

pub fn set_cycle_day(day: u32) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.cycle_day.set(f64::from(day));
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a region timer (returns a timer handle)
pub fn start_region_timer(region: &str, mode: &str) -> MetricsTimer {
    match HARVEST_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.region_duration
                .with_label_values(&[region, mode])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_encode_contains_harvest_families() {
        ensure_metrics_initialized();
        record_tick("completed");
        record_api_call("search", "ok");

        let text = encode_metrics().unwrap();
        assert!(text.contains("harvest_ticks_total"));
        assert!(text.contains("harvest_api_calls_total"));
    }

    #[test]
    fn test_recorders_do_not_panic() {
        ensure_metrics_initialized();
        record_quota_units("search", 100);
        record_quota_units("search", 0);
        record_quota_failure();
        set_credentials_cooling(2);
        record_playlists_ingested("FETCH", 3);
        record_rows_upserted("tracks", 40);
        set_cycle_day(7);
        let _timer = start_region_timer("US", "FETCH");
    }
}
