// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the dbop operator.
//!
//! All metrics carry the namespace prefix `dbop_firestoned_io_` (prometheus-safe
//! version of "dbop.firestoned.io").
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - passes, their outcomes and durations
//! - **Actor Metrics** - which reconciler stopped a pass and why
//! - **Admin Command Metrics** - dispatcher calls by operation, transport and result
//! - **Leader Election Metrics** - leadership state changes
//!
//! # Example
//!
//! ```rust,no_run
//! use dbop::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("DatabaseCluster", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all dbop metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "dbop_firestoned_io";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconcile passes by resource type and status
///
/// Labels:
/// - `resource_type`: `DatabaseCluster` or `Sandbox`
/// - `status`: Outcome (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconcile passes in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of requeues by resource type and reason
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeue operations by resource type and reason",
    );
    let counter = CounterVec::new(opts, &["resource_type", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Actor Metrics
// ============================================================================

/// Passes stopped early by an actor
///
/// Labels:
/// - `actor`: Reconciler name, e.g. `RemoveNode`
/// - `result`: `requeue` or `error`
pub static ACTOR_ABORTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_actor_aborts_total"),
        "Total number of reconcile passes aborted by an actor",
    );
    let counter = CounterVec::new(opts, &["actor", "result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Admin Command Metrics
// ============================================================================

/// Admin commands sent to the database
///
/// Labels:
/// - `operation`: e.g. `add_node`, `restart_node`
/// - `transport`: `http` or `exec`
/// - `result`: `success` or an admin error category
pub static ADMIN_COMMANDS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_admin_commands_total"),
        "Total number of admin commands by operation, transport and result",
    );
    let counter = CounterVec::new(opts, &["operation", "transport", "result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of admin commands in seconds
pub static ADMIN_COMMAND_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_admin_command_duration_seconds"),
        "Duration of admin commands in seconds by operation",
    )
    .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]);
    let histogram = HistogramVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Leader Election Metrics
// ============================================================================

/// Total number of leader election events
///
/// Labels:
/// - `status`: Event type (`acquired`, `lost`)
pub static LEADER_ELECTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_elections_total"),
        "Total number of leader election events by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Current leader election status (1 if leader, 0 if follower)
pub static LEADER_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_status"),
        "Current leader election status (1 = leader, 0 = follower)",
    );
    let gauge = GaugeVec::new(opts, &["pod_name"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a pass that ran every actor
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a pass that ended with an error
pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a pass that was stopped with a requeue
///
/// # Arguments
/// * `resource_type` - `DatabaseCluster` or `Sandbox`
/// * `reason` - Name of the actor that asked for the requeue
pub fn record_reconciliation_requeue(resource_type: &str, reason: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record an actor stopping the pipeline
pub fn record_actor_abort(actor: &str, result: &str) {
    ACTOR_ABORTS_TOTAL.with_label_values(&[actor, result]).inc();
}

/// Record one admin command
///
/// # Arguments
/// * `operation` - Dispatcher operation name
/// * `transport` - `http` or `exec`
/// * `result` - `success` or an admin error category
/// * `duration` - Time spent on the command
pub fn record_admin_command(operation: &str, transport: &str, result: &str, duration: Duration) {
    ADMIN_COMMANDS_TOTAL
        .with_label_values(&[operation, transport, result])
        .inc();
    ADMIN_COMMAND_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record leader election acquired
pub fn record_leader_elected(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL
        .with_label_values(&["acquired"])
        .inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(1.0);
}

/// Record leader election lost
pub fn record_leader_lost(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL.with_label_values(&["lost"]).inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(0.0);
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
