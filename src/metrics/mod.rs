/*!
 * # Metrics
 *
 * Reservation counters registered on the process-wide prometheus registry
 * and rendered in text exposition format at `/metrics`.
 */

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

use crate::errors::ServiceError;

lazy_static! {
    pub static ref RESERVATIONS_CREATED: IntCounter = register_int_counter!(
        "surplus_reservations_created_total",
        "Total number of reservations created"
    )
    .expect("metric can be created");

    pub static ref RESERVATION_FAILURES: IntCounterVec = register_int_counter_vec!(
        "surplus_reservation_failures_total",
        "Total number of failed reservation operations",
        &["operation", "error_type"]
    )
    .expect("metric can be created");

    pub static ref STATUS_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "surplus_reservation_status_transitions_total",
        "Total number of applied reservation status transitions",
        &["to_status"]
    )
    .expect("metric can be created");

    pub static ref NOTIFICATION_EMIT_FAILURES: IntCounter = register_int_counter!(
        "surplus_notification_emit_failures_total",
        "Total number of notifications dropped before reaching the sink"
    )
    .expect("metric can be created");
}

/// Forces registration so every series shows up before its first increment.
pub fn init() {
    lazy_static::initialize(&RESERVATIONS_CREATED);
    lazy_static::initialize(&RESERVATION_FAILURES);
    lazy_static::initialize(&STATUS_TRANSITIONS);
    lazy_static::initialize(&NOTIFICATION_EMIT_FAILURES);
}

pub fn record_failure(operation: &str, error: &ServiceError) {
    RESERVATION_FAILURES
        .with_label_values(&[operation, error.code()])
        .inc();
}

/// Renders the default registry in prometheus text format.
pub fn gather_metrics() -> Result<String, ServiceError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics are not utf-8: {}", e)))
}
