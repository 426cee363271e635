use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::debug;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder for this process
///
/// Calling it again returns the handle installed the first time.
pub fn init_metrics() -> Result<&'static PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle);
    }

    let handle = PrometheusBuilder::new()
        // Buckets: 0.1ms, 0.5ms, 1ms, 5ms, 10ms, 50ms, 100ms, 500ms, 1s
        .set_buckets_for_metric(
            Matcher::Full("skyguard.anomaly_log.save_ms".to_string()),
            &[0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0],
        )
        .context("Failed to set buckets for skyguard.anomaly_log.save_ms")?
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    describe_metrics();
    debug!("Prometheus recorder installed");
    Ok(METRICS_HANDLE.get_or_init(|| handle))
}

/// Render the current metrics in Prometheus text format, if a recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "skyguard.fixes_processed_total",
        "Position fixes that went through the full pipeline"
    );
    metrics::describe_counter!(
        "skyguard.fixes_rejected_total",
        "Position fixes discarded before detection, by reason"
    );
    metrics::describe_counter!(
        "skyguard.anomalies_detected_total",
        "GPS anomalies detected, by type"
    );
    metrics::describe_counter!(
        "skyguard.notifications_sent_total",
        "Alert notifications published"
    );
    metrics::describe_counter!(
        "skyguard.notifications_throttled_total",
        "Alert notifications held back by the minimum interval"
    );
    metrics::describe_counter!(
        "skyguard.triggers_fired_total",
        "Block off / block on triggers emitted, by type"
    );
    metrics::describe_counter!(
        "skyguard.triggers_suppressed_total",
        "Trigger transitions that fell inside the cooldown window"
    );
    metrics::describe_gauge!(
        "skyguard.alert_level",
        "Current alert level (0 normal, 1 caution, 2 warning, 3 alert)"
    );
    metrics::describe_gauge!(
        "skyguard.service.queue_depth",
        "Commands waiting for the monitor service"
    );
    metrics::describe_counter!(
        "skyguard.anomaly_log.snapshots_superseded_total",
        "Pending anomaly log snapshots replaced by a newer one before being written"
    );
    metrics::describe_histogram!(
        "skyguard.anomaly_log.save_ms",
        "Time spent writing the anomaly log"
    );
}
