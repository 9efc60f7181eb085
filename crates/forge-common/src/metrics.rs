//! Metrics for forge observability
//!
//! Provides OpenTelemetry metrics for:
//! - Reconcile outcomes and latency per controller
//! - Route table writes
//! - Revision cache hits and misses

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::Error;

/// Global meter for forge metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("forge"));

// ============================================================================
// Reconcile Metrics
// ============================================================================

/// Counter of reconcile invocations
///
/// Labels:
/// - `controller`: workload, namespace
/// - `result`: success, error
pub static RECONCILE_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("forge_reconcile_total")
        .with_description("Total number of reconcile invocations")
        .with_unit("{reconciles}")
        .build()
});

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: workload, namespace
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("forge_reconcile_duration_seconds")
        .with_description("Duration of reconcile invocations in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors by class
///
/// Labels:
/// - `controller`: workload, namespace
/// - `class`: conflict, not_found, external_resolution, ...
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("forge_reconcile_errors_total")
        .with_description("Total number of reconcile errors by class")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Route Metrics
// ============================================================================

/// Counter of route writes
///
/// Labels:
/// - `target`: listener, route_table
/// - `operation`: create, update, delete
pub static ROUTE_WRITES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("forge_route_writes_total")
        .with_description("Total number of listener and route table writes")
        .with_unit("{writes}")
        .build()
});

// ============================================================================
// Revision Cache Metrics
// ============================================================================

/// Counter of revision cache lookups
///
/// Labels:
/// - `result`: hit, miss
pub static REVISION_CACHE_LOOKUPS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("forge_revision_cache_lookups_total")
        .with_description("Total number of revision cache lookups")
        .with_unit("{lookups}")
        .build()
});

/// Record a route write
pub fn record_route_write(target: &'static str, operation: &'static str) {
    ROUTE_WRITES.add(
        1,
        &[
            KeyValue::new("target", target),
            KeyValue::new("operation", operation),
        ],
    );
}

/// Record a revision cache lookup
pub fn record_revision_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    REVISION_CACHE_LOOKUPS.add(1, &[KeyValue::new("result", result)]);
}

/// Timer for a single reconcile invocation
pub struct ReconcileTimer {
    controller: &'static str,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconcile
    pub fn start(controller: &'static str) -> Self {
        Self {
            controller,
            start: std::time::Instant::now(),
        }
    }

    /// Record the outcome and pass the result through
    pub fn finish<T>(self, result: Result<T, Error>) -> Result<T, Error> {
        let duration = self.start.elapsed().as_secs_f64();
        let outcome = if result.is_ok() { "success" } else { "error" };

        RECONCILE_DURATION.record(duration, &[KeyValue::new("controller", self.controller)]);
        RECONCILE_TOTAL.add(
            1,
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", outcome),
            ],
        );
        if let Err(e) = &result {
            RECONCILE_ERRORS.add(
                1,
                &[
                    KeyValue::new("controller", self.controller),
                    KeyValue::new("class", e.class().as_str()),
                ],
            );
        }
        result
    }
}
