//! # Error Policy
//!
//! Classification and logging of reconciliation and watch stream errors.
//!
//! Nothing here decides whether to retry: failed reconciliations are always requeued
//! with backoff and watch streams always resume. Classification only picks the log
//! level and message.

use crate::controller::types::ReconcilerError;
use crate::observability;
use tracing::{error, info, warn};

/// Coarse kind of a reconciliation error, used as the `error_class` metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 404, or the certificate Secret the cycle depends on is missing
    NotFound,
    /// 409: a concurrent writer won, or the object already exists
    Conflict,
    /// The stored certificate could not be read or generated
    Certificate,
    /// Anything else; expected to clear up on retry
    Transient,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not-found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Certificate => "certificate",
            ErrorClass::Transient => "transient",
        }
    }
}

/// Classify an API error by its status code
pub fn classify(error: &kube::Error) -> ErrorClass {
    match error {
        kube::Error::Api(api_err) if api_err.code == 404 => ErrorClass::NotFound,
        kube::Error::Api(api_err) if api_err.code == 409 => ErrorClass::Conflict,
        _ => ErrorClass::Transient,
    }
}

pub fn classify_reconciler_error(error: &ReconcilerError) -> ErrorClass {
    match error {
        ReconcilerError::SecretNotFound { .. } => ErrorClass::NotFound,
        ReconcilerError::Certificate(_) => ErrorClass::Certificate,
        ReconcilerError::Kube(kube_err) => classify(kube_err),
    }
}

/// Log a failed reconciliation and count the requeue that follows
///
/// `requeues` is the number of consecutive failures including this one.
pub fn handle_reconciliation_error(controller: &str, error: &ReconcilerError, requeues: u32) {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        controller = controller,
        error = %error
    );
    let _error_guard = error_span.enter();

    let class = classify_reconciler_error(error);
    observability::metrics::increment_reconciliation_errors(controller, class.as_str());
    observability::metrics::increment_requeues(controller);

    match class {
        ErrorClass::Conflict => {
            // Concurrent writer; the retry re-reads current state
            warn!(
                controller,
                requeues, "Reconciliation hit a write conflict, retrying: {}", error
            );
        }
        ErrorClass::NotFound => {
            warn!(
                controller,
                requeues, "Reconciliation waiting for dependency: {}", error
            );
        }
        ErrorClass::Certificate | ErrorClass::Transient => {
            error!(controller, requeues, "Reconciliation failed: {}", error);
        }
    }
}

/// Kind of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    NotFound,
    Unauthorized,
    Forbidden,
    ResourceVersionExpired,
    TooManyRequests,
    Other,
}

/// Classify a watch stream error from its rendering
///
/// The watcher wraps API errors in several layers; matching on the debug output
/// covers all of them.
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    // 404 is checked first, a plain-text 404 body surfaces as a decode failure mentioning WatchFailed
    if error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found")
    {
        WatchErrorClass::NotFound
    } else if error_string.contains("401") || error_string.contains("Unauthorized") {
        WatchErrorClass::Unauthorized
    } else if error_string.contains("403") || error_string.contains("Forbidden") {
        WatchErrorClass::Forbidden
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorClass::ResourceVersionExpired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorClass::TooManyRequests
    } else {
        WatchErrorClass::Other
    }
}

/// Log a watch stream error; the stream backs off and resumes on its own
pub fn handle_watch_stream_error(watched: &str, error: &kube_runtime::watcher::Error) {
    let error_string = format!("{error:?}");
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        watched = watched,
        error = %error
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(&error_string) {
        WatchErrorClass::ResourceVersionExpired => {
            info!(
                "Watch of {} expired (410 Gone), relisting: {}",
                watched, error
            );
        }
        WatchErrorClass::TooManyRequests => {
            warn!(
                "Watch of {} throttled by the API server (429), backing off: {}",
                watched, error
            );
        }
        WatchErrorClass::Unauthorized | WatchErrorClass::Forbidden => {
            error!(
                "Watch of {} rejected, check RBAC for the service account: {}",
                watched, error
            );
        }
        WatchErrorClass::NotFound => {
            warn!("Watch of {} returned not found: {}", watched, error);
        }
        WatchErrorClass::Other => {
            warn!("Watch of {} failed, backing off: {}", watched, error);
        }
    }
}
