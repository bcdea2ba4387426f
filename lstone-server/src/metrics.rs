/// Prometheus metrics for the LinkStone server
///
/// Metrics are recorded by the HTTP handlers and exposed at the /metrics
/// endpoint in Prometheus text format.

use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Allocations by outcome
    ///
    /// Labels:
    /// - outcome: created, reclaimed, deadline_exceeded, error
    pub static ref ALLOCATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "lstone_allocations_total",
            "Total number of token allocations by outcome"
        ),
        &["outcome"]
    )
    .unwrap();

    /// Claim calls made by the allocation loop, collisions included
    pub static ref CLAIM_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        opts!(
            "lstone_claim_attempts_total",
            "Total number of claim attempts made while allocating tokens"
        )
    )
    .unwrap();

    /// Allocation wall-clock duration in seconds
    pub static ref ALLOCATION_DURATION_SECONDS: Histogram = register_histogram!(
        histogram_opts!(
            "lstone_allocation_duration_seconds",
            "Token allocation duration in seconds",
            vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0]
        )
    )
    .unwrap();

    /// Latest advisory capacity estimate (claim attempts per budget window)
    pub static ref CAPACITY_ESTIMATE: IntGauge = register_int_gauge!(
        opts!(
            "lstone_capacity_estimate",
            "Estimated claim attempts sustainable within one allocation budget"
        )
    )
    .unwrap();

    /// Backend operations by operation and status
    ///
    /// Labels:
    /// - operation: read, reassign, remove
    /// - status: success, not_found, invalid, error
    pub static ref BACKEND_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "lstone_backend_operations_total",
            "Total number of storage backend operations"
        ),
        &["operation", "status"]
    )
    .unwrap();

    /// Records removed by the expiry sweeper
    pub static ref PURGED_RECORDS: IntGauge = register_int_gauge!(
        opts!(
            "lstone_purged_records",
            "Expired records purged by the background sweeper"
        )
    )
    .unwrap();
}

static REGISTER: Once = Once::new();

/// Register all metrics with the server registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(ALLOCATIONS_TOTAL.clone()))
            .expect("Failed to register ALLOCATIONS_TOTAL");

        REGISTRY
            .register(Box::new(CLAIM_ATTEMPTS_TOTAL.clone()))
            .expect("Failed to register CLAIM_ATTEMPTS_TOTAL");

        REGISTRY
            .register(Box::new(ALLOCATION_DURATION_SECONDS.clone()))
            .expect("Failed to register ALLOCATION_DURATION_SECONDS");

        REGISTRY
            .register(Box::new(CAPACITY_ESTIMATE.clone()))
            .expect("Failed to register CAPACITY_ESTIMATE");

        REGISTRY
            .register(Box::new(BACKEND_OPERATIONS_TOTAL.clone()))
            .expect("Failed to register BACKEND_OPERATIONS_TOTAL");

        REGISTRY
            .register(Box::new(PURGED_RECORDS.clone()))
            .expect("Failed to register PURGED_RECORDS");
    });
}

/// Status label for a failed backend call
pub fn error_label(error: &lstone_core::Error) -> &'static str {
    match error {
        lstone_core::Error::NotFound(_) => "not_found",
        lstone_core::Error::InvalidArgument(_) => "invalid",
        _ => "error",
    }
}

/// Encode metrics in Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        register_metrics();
        register_metrics();
        CLAIM_ATTEMPTS_TOTAL.inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("lstone_claim_attempts_total"));
    }

    #[test]
    fn test_error_label() {
        let missing = lstone_core::Error::NotFound("t".into());
        assert_eq!(error_label(&missing), "not_found");
        let invalid = lstone_core::Error::InvalidArgument("t".into());
        assert_eq!(error_label(&invalid), "invalid");
        let broken = lstone_core::Error::Internal("x".into());
        assert_eq!(error_label(&broken), "error");
    }
}
