use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, Registry, TextEncoder};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ALERTS_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        "mend_alerts_received_total",
        "Total number of alerts received on the webhook."
    )
    .unwrap();
    pub static ref JOBS_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        "mend_jobs_enqueued_total",
        "Total number of remediation jobs enqueued."
    )
    .unwrap();
    pub static ref JOBS_SUCCEEDED_TOTAL: IntCounter = register_int_counter!(
        "mend_jobs_succeeded_total",
        "Total number of remediation jobs that completed successfully."
    )
    .unwrap();
    pub static ref JOBS_FAILED_TOTAL: IntCounter = register_int_counter!(
        "mend_jobs_failed_total",
        "Total number of remediation jobs that failed terminally."
    )
    .unwrap();
    pub static ref JOB_RETRIES_TOTAL: IntCounter = register_int_counter!(
        "mend_job_retries_total",
        "Total number of job retry attempts scheduled."
    )
    .unwrap();
    pub static ref DISPATCHES_DEFERRED_TOTAL: IntCounter = register_int_counter!(
        "mend_dispatches_deferred_total",
        "Total number of dispatches deferred because the target was busy."
    )
    .unwrap();
    pub static ref UNRESOLVED_PARAMS_TOTAL: IntCounter = register_int_counter!(
        "mend_unresolved_params_total",
        "Total number of matching policies skipped for unresolvable parameters."
    )
    .unwrap();
}

static REGISTER: Once = Once::new();

pub fn register_metrics() {
    REGISTER.call_once(|| {
        for metric in [
            &*ALERTS_RECEIVED_TOTAL,
            &*JOBS_ENQUEUED_TOTAL,
            &*JOBS_SUCCEEDED_TOTAL,
            &*JOBS_FAILED_TOTAL,
            &*JOB_RETRIES_TOTAL,
            &*DISPATCHES_DEFERRED_TOTAL,
            &*UNRESOLVED_PARAMS_TOTAL,
        ] {
            REGISTRY
                .register(Box::new(metric.clone()))
                .expect("Failed to register metric");
        }
    });
}

pub fn gather_metrics() -> String {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}
