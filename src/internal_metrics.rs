//! # Internal Metrics Module
//!
//! Counters are recorded with the `metrics` macros at their call sites. When
//! metrics are enabled, a Prometheus recorder is installed globally and its
//! handle is rendered by the liveness server on `/metrics`. Without a
//! recorder the macros are no-ops.
//!
//! ## Recorded metrics
//!
//! - `changes_received_total{kind}`: change events seen by the feed handler.
//! - `notifications_sent_total`: alerts accepted by the messaging API.
//! - `notifications_failed_total{reason}`: failed delivery attempts.
//! - `handoff_failures_total`: records that could not reach the main loop.

use anyhow::Result;
use metrics::Unit;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and registers metric descriptions.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(
        "changes_received_total",
        Unit::Count,
        "Change events delivered by the change feed, labeled by kind."
    );
    metrics::describe_counter!(
        "notifications_sent_total",
        Unit::Count,
        "Alerts accepted by the messaging API."
    );
    metrics::describe_counter!(
        "notifications_failed_total",
        Unit::Count,
        "Delivery attempts that failed, labeled by reason."
    );
    metrics::describe_counter!(
        "handoff_failures_total",
        Unit::Count,
        "New records that could not be handed to the main loop."
    );
}
