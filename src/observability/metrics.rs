//! Metrics collection and exposition.
//!
//! # Metrics
//! - `keywheel_rotations_total` (counter): credential rotations by provider
//! - `keywheel_lock_transitions_total` (counter): lock/unlock transitions
//! - `keywheel_upstream_failures_total` (counter): failures by provider, class
//! - `keywheel_reconciled_total` (counter): tokens returned to service
//! - `keywheel_probes_total` (counter): liveness probes by provider, verdict
//!
//! # Design Decisions
//! - Low-overhead updates (atomic increments behind the metrics macros)
//! - The exporter endpoint is optional; recording is unconditional and
//!   free when no recorder is installed

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::ratelimit::ErrorClass;
use crate::tokens::Provider;

/// Install the Prometheus exporter on its own listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter started"),
        Err(e) => tracing::error!(error = %e, "failed to start metrics exporter"),
    }
}

pub fn record_rotation(provider: Provider) {
    metrics::counter!("keywheel_rotations_total", "provider" => provider.as_str()).increment(1);
}

pub fn record_lock_transition(kind: &'static str) {
    metrics::counter!("keywheel_lock_transitions_total", "kind" => kind).increment(1);
}

pub fn record_upstream_failure(provider: Provider, class: ErrorClass) {
    metrics::counter!(
        "keywheel_upstream_failures_total",
        "provider" => provider.as_str(),
        "class" => class.as_str()
    )
    .increment(1);
}

pub fn record_reconciled(provider: Provider) {
    metrics::counter!("keywheel_reconciled_total", "provider" => provider.as_str()).increment(1);
}

pub fn record_probe(provider: Provider, serviceable: bool) {
    let verdict = if serviceable { "serviceable" } else { "limited" };
    metrics::counter!(
        "keywheel_probes_total",
        "provider" => provider.as_str(),
        "verdict" => verdict
    )
    .increment(1);
}
