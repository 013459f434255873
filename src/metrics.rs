use lazy_static::lazy_static;
use prometheus::{
    Histogram, IntCounter, IntGauge, register_histogram, register_int_counter, register_int_gauge,
};

lazy_static! {
    pub static ref WEBHOOKS_CREATED: IntCounter = register_int_counter!(
        "webhooks_created_total",
        "Number of webhook registrations created"
    )
    .unwrap();
    pub static ref WEBHOOKS_DELETED: IntCounter = register_int_counter!(
        "webhooks_deleted_total",
        "Number of webhook registrations deleted"
    )
    .unwrap();
    pub static ref WEBHOOK_ERRORS: IntCounter = register_int_counter!(
        "webhook_errors_total",
        "Number of webhook create/delete requests that failed"
    )
    .unwrap();
    pub static ref EVENTLISTENER_TRIGGERS: IntGauge = register_int_gauge!(
        "eventlistener_triggers",
        "Number of triggers currently held by the shared eventlistener"
    )
    .unwrap();
    pub static ref RECONCILE_DURATION: Histogram = register_histogram!(
        "webhook_reconcile_duration_seconds",
        "Time spent reconciling the eventlistener trigger set"
    )
    .unwrap();
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
