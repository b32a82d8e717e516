//! Telemetry bootstrap for Omnidesk binaries.
//!
//! One call to [`install`] per process wires up the fmt subscriber with
//! `RUST_LOG` filtering. Metric helpers wrap the `metrics` facade so call
//! sites stay terse and label names stay consistent.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the tracing subscriber configured from `RUST_LOG`.
///
/// Safe to call once per process; a second call returns an error from the
/// global-default guard rather than silently re-installing.
pub fn install(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!("install tracing subscriber: {err}"))?;
    tracing::info!(service = service_name, "telemetry installed");
    Ok(())
}

/// Counts an ingress-accepted event.
pub fn record_ingress(tenant: &str, platform: &str) {
    metrics::counter!(
        "odm_ingress_events",
        "tenant" => tenant.to_string(),
        "platform" => platform.to_string()
    )
    .increment(1);
}

/// Counts a duplicate dropped by the idempotency guard.
pub fn record_duplicate(tenant: &str, platform: &str) {
    metrics::counter!(
        "odm_duplicates_dropped",
        "tenant" => tenant.to_string(),
        "platform" => platform.to_string()
    )
    .increment(1);
}

/// Counts a direct-mode fallback taken because the durable queue was down.
pub fn record_direct_fallback(tenant: &str) {
    metrics::counter!("odm_direct_fallbacks", "tenant" => tenant.to_string()).increment(1);
}

/// Counts a drift correction applied to a connection's stored account id.
pub fn record_drift_correction(tenant: &str, platform: &str) {
    metrics::counter!(
        "odm_drift_corrections",
        "tenant" => tenant.to_string(),
        "platform" => platform.to_string()
    )
    .increment(1);
}

/// Counts an automated reply persisted by the response orchestrator.
pub fn record_reply(tenant: &str) {
    metrics::counter!("odm_replies_generated", "tenant" => tenant.to_string()).increment(1);
}

/// Counts a swallowed realtime publish failure.
pub fn record_publish_failure(scope: &str) {
    metrics::counter!("odm_realtime_publish_failures", "scope" => scope.to_string()).increment(1);
}
