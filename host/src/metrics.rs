use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec, TextEncoder,
};

pub static JOBS_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "backup_jobs_created_total",
        "Jobs created, by method",
        &["method"]
    )
    .expect("metric registration is infallible at startup")
});

pub static TASKS_REQUESTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "backup_tasks_requested_total",
        "Tasks created through the API"
    )
    .expect("metric registration is infallible at startup")
});

pub static WEBHOOK_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "backup_webhook_events_total",
        "Webhook envelopes received, by outcome",
        &["outcome"]
    )
    .expect("metric registration is infallible at startup")
});

/// Render the default registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}
