//! # Metrics
//!
//! Prometheus metrics for monitoring the controllers and the admission server.
//!
//! ## Metrics Exposed
//!
//! - `node_ip_webhook_reconciliations_total{controller}` - Total number of reconciliations
//! - `node_ip_webhook_reconciliation_errors_total{controller}` - Total number of failed reconciliations
//! - `node_ip_webhook_reconciliation_duration_seconds{controller}` - Duration of reconciliations
//! - `node_ip_webhook_requeues_total{controller}` - Rate-limited requeues after failures
//! - `node_ip_webhook_certificate_rotations_total{reason}` - Certificates written to the Secret
//! - `node_ip_webhook_certificate_expiry_seconds` - Remaining validity of the stored certificate
//! - `node_ip_webhook_admission_requests_total{result}` - Admission reviews answered

use anyhow::Result;
use prometheus::{Gauge, HistogramVec, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "node_ip_webhook_reconciliations_total",
            "Total number of reconciliations by controller",
        ),
        &["controller"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "node_ip_webhook_reconciliation_errors_total",
            "Total number of reconciliation errors by controller and error class",
        ),
        &["controller", "error_class"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "node_ip_webhook_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds by controller",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["controller"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "node_ip_webhook_requeues_total",
            "Total number of rate-limited requeues by controller",
        ),
        &["controller"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static CERTIFICATE_ROTATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "node_ip_webhook_certificate_rotations_total",
            "Total number of certificates written to the Secret by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create CERTIFICATE_ROTATIONS_TOTAL metric - this should never happen")
});

static CERTIFICATE_EXPIRY_SECONDS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new(
        "node_ip_webhook_certificate_expiry_seconds",
        "Seconds until the stored webhook certificate expires",
    )
    .expect("Failed to create CERTIFICATE_EXPIRY_SECONDS metric - this should never happen")
});

static ADMISSION_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "node_ip_webhook_admission_requests_total",
            "Total number of admission requests by result",
        ),
        &["result"],
    )
    .expect("Failed to create ADMISSION_REQUESTS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Only fails when called twice, which initialization never does"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATE_ROTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATE_EXPIRY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_REQUESTS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(controller: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[controller]).inc();
}

pub fn increment_reconciliation_errors(controller: &str, error_class: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[controller, error_class])
        .inc();
}

pub fn observe_reconciliation_duration(controller: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[controller])
        .observe(duration);
}

pub fn increment_requeues(controller: &str) {
    REQUEUES_TOTAL.with_label_values(&[controller]).inc();
}

/// Why a new certificate was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// The Secret did not exist
    Created,
    /// The stored certificate was within the expiration threshold
    Expiring,
    /// The stored certificate could not be parsed
    Unparseable,
}

impl RotationReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationReason::Created => "created",
            RotationReason::Expiring => "expiring",
            RotationReason::Unparseable => "unparseable",
        }
    }
}

pub fn increment_certificate_rotations(reason: RotationReason) {
    CERTIFICATE_ROTATIONS_TOTAL
        .with_label_values(&[reason.as_str()])
        .inc();
}

pub fn set_certificate_expiry(remaining: chrono::Duration) {
    #[allow(
        clippy::cast_precision_loss,
        reason = "Second precision is plenty for an expiry gauge"
    )]
    let seconds = remaining.num_seconds() as f64;
    CERTIFICATE_EXPIRY_SECONDS.set(seconds);
}

pub fn increment_admission_requests(result: &str) {
    ADMISSION_REQUESTS_TOTAL.with_label_values(&[result]).inc();
}

#[cfg(test)]
pub(crate) fn reconciliation_errors(controller: &str, error_class: &str) -> u64 {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[controller, error_class])
        .get()
}
